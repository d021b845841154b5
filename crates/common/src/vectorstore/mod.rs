//! Vector collections
//!
//! `VectorStore` is the storage backend; `Collection` binds one collection
//! name to a backend for the lifetime of a request and validates arguments
//! before anything reaches storage.

pub mod mmr;
pub mod pgvector;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use pgvector::PgVectorStore;

/// Free-form document metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A stored or retrieved text chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

/// A search hit with its stored embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub document: Document,
    pub embedding: Vec<f32>,
    /// Cosine relevance to the query, 1 is identical
    pub score: f32,
}

/// Nearest candidates for a query, best first, and the query's own embedding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub query_embedding: Vec<f32>,
    pub hits: Vec<Candidate>,
}

/// How `Collection::retrieve` ranks results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    Mmr,
    Similarity,
    SimilarityScoreThreshold,
}

impl SearchType {
    pub const ALL: [SearchType; 3] = [
        SearchType::Mmr,
        SearchType::Similarity,
        SearchType::SimilarityScoreThreshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Mmr => "mmr",
            SearchType::Similarity => "similarity",
            SearchType::SimilarityScoreThreshold => "similarity_score_threshold",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        SearchType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::InvalidArgument {
                message: format!(
                    "Invalid search_type '{}'. Must be one of: {}",
                    s,
                    SearchType::ALL.map(|t| t.as_str()).join(", ")
                ),
            })
    }
}

/// Tuning for `Collection::retrieve`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverOptions {
    /// Documents returned
    pub k: usize,
    /// Candidates considered by MMR
    pub fetch_k: usize,
    /// MMR balance between relevance (1) and diversity (0)
    pub lambda_mult: f32,
    /// Minimum relevance for `SimilarityScoreThreshold`
    pub score_threshold: Option<f32>,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            k: 4,
            fetch_k: 20,
            lambda_mult: 0.5,
            score_threshold: None,
        }
    }
}

/// Storage backend for named collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Make sure the collection exists, creating it when absent
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Embed and store documents; ids are returned in input order
    async fn add_documents(&self, collection: &str, docs: &[Document]) -> Result<Vec<String>>;

    /// Remove documents by id
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<bool>;

    /// The `k` documents closest to `query`, best first
    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Document>>;

    /// Up to `fetch_k` nearest documents with embeddings and relevance scores
    async fn search_candidates(
        &self,
        collection: &str,
        query: &str,
        fetch_k: usize,
    ) -> Result<Candidates>;
}

/// A collection name bound to a storage backend
pub struct Collection {
    name: String,
    store: Arc<dyn VectorStore>,
}

impl Collection {
    /// Bind `name` for the current request
    pub async fn bind(store: Arc<dyn VectorStore>, name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Collection name cannot be empty.".to_string(),
            });
        }

        store.ensure_collection(name).await?;

        Ok(Self {
            name: name.to_string(),
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add_documents(&self, docs: &[Document]) -> Result<Vec<String>> {
        if docs.is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Cannot add an empty document list.".to_string(),
            });
        }
        self.store.add_documents(&self.name, docs).await
    }

    pub async fn delete(&self, ids: &[String]) -> Result<bool> {
        if ids.is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Cannot delete with an empty ID list.".to_string(),
            });
        }
        self.store.delete(&self.name, ids).await
    }

    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Search query cannot be empty.".to_string(),
            });
        }
        if k < 1 {
            return Err(AppError::InvalidArgument {
                message: format!("k must be >= 1, got {}", k),
            });
        }
        self.store.similarity_search(&self.name, query, k).await
    }

    /// Ranked retrieval by `search_type`
    pub async fn retrieve(
        &self,
        query: &str,
        search_type: SearchType,
        options: &RetrieverOptions,
    ) -> Result<Vec<Document>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Retriever query cannot be empty.".to_string(),
            });
        }
        if options.k < 1 {
            return Err(AppError::InvalidArgument {
                message: format!("k must be >= 1, got {}", options.k),
            });
        }

        match search_type {
            SearchType::Similarity => self.store.similarity_search(&self.name, query, options.k).await,
            SearchType::SimilarityScoreThreshold => {
                let threshold = match options.score_threshold {
                    Some(t) if (0.0..=1.0).contains(&t) => t,
                    other => {
                        return Err(AppError::InvalidArgument {
                            message: format!(
                                "score_threshold must be between 0 and 1 for similarity_score_threshold, got {:?}",
                                other
                            ),
                        })
                    }
                };
                let candidates = self
                    .store
                    .search_candidates(&self.name, query, options.k)
                    .await?;
                Ok(candidates
                    .hits
                    .into_iter()
                    .filter(|hit| hit.score >= threshold)
                    .take(options.k)
                    .map(|hit| hit.document)
                    .collect())
            }
            SearchType::Mmr => {
                if !(0.0..=1.0).contains(&options.lambda_mult) {
                    return Err(AppError::InvalidArgument {
                        message: format!(
                            "lambda_mult must be between 0 and 1, got {}",
                            options.lambda_mult
                        ),
                    });
                }
                let fetch_k = options.fetch_k.max(options.k);
                let candidates = self.store.search_candidates(&self.name, query, fetch_k).await?;
                let embeddings: Vec<Vec<f32>> = candidates
                    .hits
                    .iter()
                    .map(|hit| hit.embedding.clone())
                    .collect();
                let picked = mmr::maximal_marginal_relevance(
                    &candidates.query_embedding,
                    &embeddings,
                    options.lambda_mult,
                    options.k,
                );
                Ok(picked
                    .into_iter()
                    .map(|i| candidates.hits[i].document.clone())
                    .collect())
            }
        }
    }
}
