//! Document parsing strategies
//!
//! Every strategy converts a PDF on disk into text plus a format tag and an
//! image map. Strategies are picked by key once at startup; an unknown key
//! or a missing credential fails construction.

pub mod quality;
pub mod speed;

use crate::errors::ParserError;
use asynx_common::config::IngestionConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use quality::LocalPdfParser;
pub use speed::HostedParser;

/// Format of parsed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
        }
    }
}

/// Extracted images keyed by name
pub type ImageMap = HashMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub format: OutputFormat,
    pub images: ImageMap,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Strategy key this parser was registered under
    fn name(&self) -> &'static str;

    fn validate_input(&self, path: &Path) -> Result<(), ParserError> {
        validate_pdf_path(path)
    }

    async fn parse(&self, path: &Path) -> Result<ParsedDocument, ParserError>;
}

/// Path must be non-blank, exist as a file and carry a `.pdf` extension
pub fn validate_pdf_path(path: &Path) -> Result<(), ParserError> {
    if path.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(ParserError::InvalidDocument(
            "PDF path cannot be empty.".to_string(),
        ));
    }
    if !path.is_file() {
        return Err(ParserError::InvalidDocument(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let is_pdf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(ParserError::InvalidDocument(format!(
            "Expected a .pdf file, got: {}",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserStrategy {
    /// Local structural extraction
    Quality,
    /// Hosted parsing service
    Speed,
}

impl ParserStrategy {
    pub const ALL: [ParserStrategy; 2] = [ParserStrategy::Quality, ParserStrategy::Speed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParserStrategy::Quality => "quality",
            ParserStrategy::Speed => "speed",
        }
    }
}

impl fmt::Display for ParserStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserStrategy {
    type Err = ParserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| {
                let valid = Self::ALL
                    .iter()
                    .map(|strategy| format!("'{}'", strategy))
                    .collect::<Vec<_>>()
                    .join(", ");
                ParserError::Init(format!(
                    "Unknown parser strategy '{}'. Choose from: {}",
                    s, valid
                ))
            })
    }
}

/// Build the parser registered under `strategy`
pub fn create_parser(
    strategy: ParserStrategy,
    config: &IngestionConfig,
) -> Result<Arc<dyn DocumentParser>, ParserError> {
    let parser: Arc<dyn DocumentParser> = match strategy {
        ParserStrategy::Quality => Arc::new(LocalPdfParser::new()),
        ParserStrategy::Speed => Arc::new(HostedParser::new(config)?),
    };
    tracing::info!(strategy = %strategy, parser = parser.name(), "Document parser ready");
    Ok(parser)
}

/// Build the parser named by `ingestion.parser_strategy`
pub fn parser_from_config(config: &IngestionConfig) -> Result<Arc<dyn DocumentParser>, ParserError> {
    let strategy: ParserStrategy = config.parser_strategy.parse()?;
    create_parser(strategy, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strategy_keys() {
        assert_eq!("quality".parse::<ParserStrategy>().unwrap(), ParserStrategy::Quality);
        assert_eq!("speed".parse::<ParserStrategy>().unwrap(), ParserStrategy::Speed);

        let err = "fast".parse::<ParserStrategy>().unwrap_err();
        assert!(matches!(err, ParserError::Init(_)));
        assert!(err.to_string().contains("'quality', 'speed'"));
    }

    #[test]
    fn test_speed_requires_credential() {
        let config = IngestionConfig::default();
        let result = create_parser(ParserStrategy::Speed, &config);
        assert!(matches!(result, Err(ParserError::Init(_))));

        let config = IngestionConfig {
            llama_cloud_api_key: Some("llx-test".to_string()),
            ..IngestionConfig::default()
        };
        assert_eq!(create_parser(ParserStrategy::Speed, &config).unwrap().name(), "speed");
    }

    #[test]
    fn test_parser_from_config_defaults_to_quality() {
        let parser = parser_from_config(&IngestionConfig::default()).unwrap();
        assert_eq!(parser.name(), "quality");

        let config = IngestionConfig {
            parser_strategy: "marker".to_string(),
            ..IngestionConfig::default()
        };
        assert!(parser_from_config(&config).is_err());
    }

    #[test]
    fn test_validate_pdf_path() {
        assert!(matches!(
            validate_pdf_path(Path::new("  ")),
            Err(ParserError::InvalidDocument(_))
        ));
        assert!(matches!(
            validate_pdf_path(Path::new("/definitely/missing.pdf")),
            Err(ParserError::InvalidDocument(_))
        ));

        let mut txt = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(txt, "plain text").unwrap();
        let err = validate_pdf_path(txt.path()).unwrap_err();
        assert!(err.to_string().contains("Expected a .pdf file"));

        let pdf = tempfile::Builder::new().suffix(".PDF").tempfile().unwrap();
        assert!(validate_pdf_path(pdf.path()).is_ok());
    }
}
