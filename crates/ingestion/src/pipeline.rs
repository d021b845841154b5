//! Ingestion pipeline
//!
//! Stages the upload in a scoped temp file, parses it, chunks the text and
//! stores every chunk in the target collection in a single call.

use crate::chunker::{chunk_document, ChunkSettings};
use crate::parsers::DocumentParser;
use asynx_common::errors::{AppError, Result};
use asynx_common::metrics;
use asynx_common::vectorstore::{Collection, Metadata, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const UPLOAD_SUCCESS_MESSAGE: &str = "Documents uploaded and indexed successfully.";

/// A received document and where to index it
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub vector_index: String,
    pub settings: ChunkSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub vector_index: String,
    /// Chunk ids in chunk order
    pub document_ids: Vec<String>,
    pub num_chunks: usize,
    pub message: String,
}

pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    parser: Arc<dyn DocumentParser>,
    upload_dir: Option<PathBuf>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn VectorStore>, parser: Arc<dyn DocumentParser>) -> Self {
        Self {
            store,
            parser,
            upload_dir: None,
        }
    }

    /// Stage uploads in `dir` instead of the system temp directory
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    #[instrument(skip(self, upload), fields(filename = %upload.filename, vector_index = %upload.vector_index))]
    pub async fn ingest(&self, upload: Upload) -> Result<UploadResponse> {
        if !is_pdf(&upload.filename) {
            return Err(AppError::InvalidInput {
                message: format!("Only PDF files are supported, got '{}'", upload.filename),
            });
        }
        upload.settings.validate()?;
        let vector_index = upload.vector_index.trim();
        if vector_index.is_empty() {
            return Err(AppError::InvalidInput {
                message: "vector_index cannot be empty.".to_string(),
            });
        }

        let start = Instant::now();

        // Removed when dropped, whichever way this function returns
        let staged = self.stage(&upload.bytes).await?;

        let parsed = self.parser.parse(staged.path()).await.map_err(|e| {
            warn!(error = %e, parser = self.parser.name(), "Parsing failed");
            if e.is_document_error() {
                AppError::UnprocessableDocument {
                    message: e.to_string(),
                }
            } else {
                AppError::IngestionFailure {
                    message: e.to_string(),
                }
            }
        })?;

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::from(upload.filename.clone()));
        metadata.insert("vector_index".to_string(), Value::from(vector_index));

        let chunks = chunk_document(&parsed.text, parsed.format, &metadata, &upload.settings)?;
        if chunks.is_empty() {
            return Err(AppError::InvalidInput {
                message: "No content could be extracted from the document.".to_string(),
            });
        }

        let document_ids = async {
            let collection = Collection::bind(Arc::clone(&self.store), vector_index).await?;
            collection.add_documents(&chunks).await
        }
        .await
        .map_err(|e| AppError::IngestionFailure {
            message: e.to_string(),
        })?;

        metrics::record_ingestion(start.elapsed().as_secs_f64(), chunks.len(), vector_index);
        info!(
            chunks = chunks.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Document indexed"
        );

        Ok(UploadResponse {
            vector_index: vector_index.to_string(),
            num_chunks: chunks.len(),
            document_ids,
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
        })
    }

    async fn stage(&self, bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("asynx-upload-").suffix(".pdf");
        let file = match &self.upload_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tokio::fs::write(file.path(), bytes).await?;
        Ok(file)
    }
}

fn is_pdf(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".pdf")
}
