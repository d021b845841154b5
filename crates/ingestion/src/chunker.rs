//! Text chunking module
//!
//! Splits parsed text into overlapping chunks for embedding. Markdown output
//! is split along its structure; anything else with the plain text splitter.

use crate::parsers::OutputFormat;
use asynx_common::errors::{AppError, Result};
use asynx_common::vectorstore::{Document, Metadata};
use serde_json::Value;
use text_splitter::{ChunkConfig, MarkdownSplitter, TextSplitter};
use tracing::debug;

/// Smallest accepted chunk size in characters
pub const MIN_CHUNK_SIZE: usize = 100;

/// Configuration for text chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between neighbouring chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(AppError::InvalidInput {
                message: format!(
                    "chunk_size must be at least {}, got {}",
                    MIN_CHUNK_SIZE, self.chunk_size
                ),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::InvalidInput {
                message: format!(
                    "chunk_overlap ({}) must be smaller than chunk_size ({})",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        Ok(())
    }

    fn chunk_config(&self) -> Result<ChunkConfig<text_splitter::Characters>> {
        ChunkConfig::new(self.chunk_size)
            .with_overlap(self.chunk_overlap)
            .map_err(|e| AppError::InvalidInput {
                message: e.to_string(),
            })
    }
}

/// Split `text` into documents carrying `metadata` plus their `chunk_index`
pub fn chunk_document(
    text: &str,
    format: OutputFormat,
    metadata: &Metadata,
    settings: &ChunkSettings,
) -> Result<Vec<Document>> {
    settings.validate()?;
    let config = settings.chunk_config()?;

    let chunks: Vec<&str> = match format {
        OutputFormat::Markdown => MarkdownSplitter::new(config).chunks(text).collect(),
        OutputFormat::Text => TextSplitter::new(config).chunks(text).collect(),
    };

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size = settings.chunk_size,
        format = format.as_str(),
        "Text chunked"
    );

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut meta = metadata.clone();
            meta.insert("chunk_index".to_string(), Value::from(index));
            Document::new(chunk, meta)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_metadata() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), Value::from("paper.pdf"));
        meta.insert("vector_index".to_string(), Value::from("docs"));
        meta
    }

    #[test]
    fn test_basic_chunking() {
        let text = "This is a test sentence. ".repeat(100);
        let settings = ChunkSettings {
            chunk_size: 200,
            chunk_overlap: 50,
        };

        let chunks =
            chunk_document(&text, OutputFormat::Text, &base_metadata(), &settings).unwrap();
        assert!(chunks.len() > 1);

        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.page_content.chars().count() <= settings.chunk_size);
            assert_eq!(chunk.metadata["chunk_index"], Value::from(i));
            assert_eq!(chunk.metadata["source"], "paper.pdf");
            assert_eq!(chunk.metadata["vector_index"], "docs");
        }
    }

    #[test]
    fn test_markdown_chunking() {
        let text = "# Heading\n\nFirst paragraph of text.\n\n## Section\n\n".repeat(40);
        let chunks = chunk_document(
            &text,
            OutputFormat::Markdown,
            &Metadata::new(),
            &ChunkSettings::default(),
        )
        .unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        let small = ChunkSettings {
            chunk_size: 99,
            chunk_overlap: 0,
        };
        assert!(matches!(small.validate(), Err(AppError::InvalidInput { .. })));

        let overlap = ChunkSettings {
            chunk_size: 100,
            chunk_overlap: 100,
        };
        assert!(matches!(overlap.validate(), Err(AppError::InvalidInput { .. })));
        assert!(ChunkSettings::default().validate().is_ok());
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_document(
            "   ",
            OutputFormat::Text,
            &Metadata::new(),
            &ChunkSettings::default(),
        )
        .unwrap();
        assert!(chunks.is_empty());
    }
}
