//! Document upload and deletion handlers

use super::json_rejection;
use crate::AppState;
use asynx_common::errors::{AppError, Result};
use asynx_ingestion::{ChunkSettings, DeleteRequest, DeleteResponse, Upload, UploadResponse};
use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};

/// Multipart upload: `file`, `vector_index`, optional `chunk_size` / `chunk_overlap`
pub async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let mut multipart = multipart.map_err(|e| AppError::InvalidRequest {
        message: e.body_text(),
    })?;
    let limit = state.config.server.max_upload_bytes;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut vector_index: Option<String> = None;
    let mut settings = ChunkSettings::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((filename, bytes.to_vec()));
            }
            "vector_index" => {
                vector_index = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            "chunk_size" => {
                let raw = field.text().await.map_err(|e| multipart_error(e, limit))?;
                settings.chunk_size = parse_size("chunk_size", &raw)?;
            }
            "chunk_overlap" => {
                let raw = field.text().await.map_err(|e| multipart_error(e, limit))?;
                settings.chunk_overlap = parse_size("chunk_overlap", &raw)?;
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown upload field");
            }
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::InvalidInput {
        message: "Missing 'file' field".to_string(),
    })?;
    let vector_index = vector_index.ok_or_else(|| AppError::InvalidInput {
        message: "Missing 'vector_index' field".to_string(),
    })?;

    let response = state
        .ingestion
        .ingest(Upload {
            filename,
            bytes,
            vector_index,
            settings,
        })
        .await?;

    Ok(Json(response))
}

/// Remove chunks by id from a collection
pub async fn delete(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<DeleteResponse>> {
    let Json(request) = payload.map_err(json_rejection)?;
    Ok(Json(state.deletion.delete(request).await?))
}

fn parse_size(field: &str, raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|_| AppError::InvalidInput {
        message: format!("{} must be a positive integer, got '{}'", field, raw.trim()),
    })
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::InvalidRequest {
            message: err.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("chunk_size", " 500 ").unwrap(), 500);
        assert!(matches!(
            parse_size("chunk_size", "-1"),
            Err(AppError::InvalidInput { .. })
        ));
        assert!(matches!(
            parse_size("chunk_overlap", "lots"),
            Err(AppError::InvalidInput { .. })
        ));
    }
}
