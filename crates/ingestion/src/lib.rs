//! Asynx Ingestion
//!
//! Turns uploaded PDFs into indexed chunks and removes them again:
//! 1. Stage the upload in a scoped temp file
//! 2. Parse it with the configured strategy
//! 3. Split the text into overlapping chunks
//! 4. Store all chunks in the target collection

pub mod chunker;
pub mod deletion;
pub mod errors;
pub mod parsers;
pub mod pipeline;

pub use chunker::ChunkSettings;
pub use deletion::{DeleteRequest, DeleteResponse, DeletionPipeline};
pub use errors::ParserError;
pub use parsers::{create_parser, parser_from_config, DocumentParser, ParserStrategy};
pub use pipeline::{IngestionPipeline, Upload, UploadResponse};
