//! Deletion pipeline

use asynx_common::errors::{AppError, Result};
use asynx_common::metrics;
use asynx_common::vectorstore::{Collection, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const DELETE_SUCCESS_MESSAGE: &str = "Documents deleted successfully.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub vector_index: String,
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub vector_index: String,
    pub deleted_ids: Vec<String>,
    pub message: String,
}

pub struct DeletionPipeline {
    store: Arc<dyn VectorStore>,
    /// Treat a `false` delete result as a failure
    strict: bool,
}

impl DeletionPipeline {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[instrument(skip(self, request), fields(vector_index = %request.vector_index, ids = request.document_ids.len()))]
    pub async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse> {
        if request.document_ids.is_empty() {
            return Err(AppError::InvalidInput {
                message: "document_ids cannot be empty.".to_string(),
            });
        }

        let deleted = async {
            let collection = Collection::bind(Arc::clone(&self.store), &request.vector_index).await?;
            collection.delete(&request.document_ids).await
        }
        .await
        .map_err(|e| AppError::DeletionFailure {
            message: e.to_string(),
        })?;

        if !deleted {
            if self.strict {
                return Err(AppError::DeletionFailure {
                    message: format!(
                        "No documents matched the given ids in '{}'",
                        request.vector_index
                    ),
                });
            }
            warn!("Storage reported nothing deleted");
        }

        metrics::record_deletion(request.document_ids.len(), &request.vector_index);
        info!(deleted = deleted, "Delete complete");

        Ok(DeleteResponse {
            vector_index: request.vector_index,
            deleted_ids: request.document_ids,
            message: DELETE_SUCCESS_MESSAGE.to_string(),
        })
    }
}
