//! API handlers module

pub mod chat;
pub mod health;
pub mod rag;

use asynx_common::errors::AppError;
use axum::extract::rejection::JsonRejection;

/// Malformed or mistyped JSON bodies are request errors
pub(crate) fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::InvalidRequest {
        message: rejection.body_text(),
    }
}
