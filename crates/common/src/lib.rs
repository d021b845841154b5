//! Asynx Common Library
//!
//! Shared code for the Asynx gateway and ingestion crates including:
//! - Configuration management
//! - Error types and handling
//! - Database pool, embedding client and pgvector-backed collections
//! - Chat model client
//! - The retrieval-augmented chat pipeline
//! - Metrics and observability

pub mod chat;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod vectorstore;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use chat::{ChatRequest, ChatResponse, RagPipeline, StreamEvent};
pub use config::AppConfig;
pub use db::DbPool;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;
pub use vectorstore::{Collection, Document, VectorStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chat model used when a request names none
pub const DEFAULT_CHAT_MODEL: &str = "gpt-5-mini";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
