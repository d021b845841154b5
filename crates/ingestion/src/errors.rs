//! Document parser error types

use asynx_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    /// The parser could not be constructed
    #[error("Parser initialization failed: {0}")]
    Init(String),

    /// The input is not a readable PDF path
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The document was read but produced no usable text
    #[error("Document conversion failed: {0}")]
    Conversion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParserError {
    /// Failures caused by the document itself rather than the service
    pub fn is_document_error(&self) -> bool {
        matches!(self, ParserError::InvalidDocument(_) | ParserError::Conversion(_))
    }
}

impl From<ParserError> for AppError {
    fn from(e: ParserError) -> Self {
        match e {
            ParserError::Init(message) => AppError::Configuration { message },
            ParserError::InvalidDocument(_) | ParserError::Conversion(_) => {
                AppError::UnprocessableDocument {
                    message: e.to_string(),
                }
            }
            ParserError::Io(_) => AppError::IngestionFailure {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_errors_are_unprocessable() {
        let err: AppError = ParserError::Conversion("no content".into()).into();
        assert!(matches!(err, AppError::UnprocessableDocument { .. }));

        let err: AppError = ParserError::InvalidDocument("File not found: x.pdf".into()).into();
        assert!(matches!(err, AppError::UnprocessableDocument { .. }));
    }

    #[test]
    fn test_init_error_is_configuration() {
        let err: AppError = ParserError::Init("missing key".into()).into();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(!ParserError::Init("x".into()).is_document_error());
    }
}
