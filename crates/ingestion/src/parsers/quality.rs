//! Local PDF text extraction
//!
//! Extracts text page by page with lopdf on the blocking pool. Pages that
//! fail to decode are skipped. A document without any text yields empty
//! output rather than an error.

use super::{DocumentParser, ImageMap, OutputFormat, ParsedDocument};
use crate::errors::ParserError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Separator between extracted pages
pub const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Default)]
pub struct LocalPdfParser;

impl LocalPdfParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentParser for LocalPdfParser {
    fn name(&self) -> &'static str {
        "quality"
    }

    async fn parse(&self, path: &Path) -> Result<ParsedDocument, ParserError> {
        self.validate_input(path)?;

        let owned: PathBuf = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_text(&owned))
            .await
            .map_err(|e| ParserError::Conversion(format!("Extraction task failed: {}", e)))??;

        Ok(ParsedDocument {
            text,
            format: OutputFormat::Text,
            images: ImageMap::new(),
        })
    }
}

fn extract_text(path: &Path) -> Result<String, ParserError> {
    let doc = lopdf::Document::load(path).map_err(|e| {
        ParserError::Conversion(format!("Failed to load '{}': {}", path.display(), e))
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut extracted = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(raw) => {
                let cleaned = clean_text(&raw);
                if !cleaned.is_empty() {
                    extracted.push(cleaned);
                }
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if extracted.is_empty() {
        warn!(path = %path.display(), "No text content extracted");
    }

    Ok(extracted.join(PAGE_SEPARATOR))
}

/// Collapse whitespace and normalize typographic quotes
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(&['\u{201C}', '\u{201D}'][..], "\"")
        .replace(&['\u{2018}', '\u{2019}'][..], "'")
}
