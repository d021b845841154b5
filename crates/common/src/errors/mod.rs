//! Error types for Asynx services
//!
//! Provides a single error taxonomy with:
//! - Distinct error kinds for each pipeline stage
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client errors
    InvalidRequest,
    InvalidInput,
    InvalidArgument,
    PayloadTooLarge,
    UnprocessableDocument,

    // Rate limiting
    RateLimited,

    // Database errors
    DatabaseError,
    ConnectionError,

    // External service errors
    EmbeddingError,
    LlmError,

    // Pipeline failures
    RetrievalFailure,
    GenerationFailure,
    IngestionFailure,
    DeletionFailure,

    // Internal errors
    InternalError,
    ConfigurationError,
    SerializationError,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Client-correctable errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Raised by the vector-store facade before any storage call
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Payload too large: uploads are limited to {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Unprocessable document: {message}")]
    UnprocessableDocument { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Pipeline failures (collaborator errors re-wrapped at the boundary)
    #[error("Retrieval failed: {message}")]
    RetrievalFailure { message: String },

    #[error("Generation failed: {message}")]
    GenerationFailure { message: String },

    #[error("Ingestion failed: {message}")]
    IngestionFailure { message: String },

    #[error("Deletion failed: {message}")]
    DeletionFailure { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("LLM service error: {message}")]
    LlmError { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::UnprocessableDocument { .. } => ErrorCode::UnprocessableDocument,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::RetrievalFailure { .. } => ErrorCode::RetrievalFailure,
            AppError::GenerationFailure { .. } => ErrorCode::GenerationFailure,
            AppError::IngestionFailure { .. } => ErrorCode::IngestionFailure,
            AppError::DeletionFailure { .. } => ErrorCode::DeletionFailure,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest { .. }
            | AppError::InvalidInput { .. }
            | AppError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 422 Unprocessable Entity
            AppError::UnprocessableDocument { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::RetrievalFailure { .. }
            | AppError::GenerationFailure { .. }
            | AppError::IngestionFailure { .. }
            | AppError::DeletionFailure { .. }
            | AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. } | AppError::LlmError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
