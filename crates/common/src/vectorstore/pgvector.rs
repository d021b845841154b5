//! PostgreSQL + pgvector backend
//!
//! Uses the two-table layout of `langchain_pg_collection` /
//! `langchain_pg_embedding`, so collections written by other tools that
//! share that layout stay readable. Vectors are bound as text and cast with
//! `::vector` since SeaORM has no native pgvector type.

use super::{Candidate, Candidates, Document, Metadata, VectorStore};
use crate::db::DbPool;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, Statement, TransactionTrait};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    r#"
    CREATE TABLE IF NOT EXISTS langchain_pg_collection (
        uuid UUID PRIMARY KEY,
        name VARCHAR NOT NULL UNIQUE,
        cmetadata JSON
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS langchain_pg_embedding (
        id VARCHAR PRIMARY KEY,
        collection_id UUID REFERENCES langchain_pg_collection (uuid) ON DELETE CASCADE,
        embedding VECTOR,
        document VARCHAR,
        cmetadata JSONB
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_cmetadata_gin
        ON langchain_pg_embedding USING gin (cmetadata jsonb_path_ops)
    "#,
];

/// Vector store over pgvector
#[derive(Clone)]
pub struct PgVectorStore {
    db: DbPool,
    embedder: Arc<dyn Embedder>,
}

impl PgVectorStore {
    pub fn new(db: DbPool, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Create the extension, tables and index if they are missing
    pub async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            self.db.conn().execute_unprepared(stmt).await?;
        }
        info!("Vector store schema ready");
        Ok(())
    }

    async fn collection_id(&self, collection: &str) -> Result<Uuid> {
        let row = self
            .db
            .conn()
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT uuid FROM langchain_pg_collection WHERE name = $1",
                vec![collection.into()],
            ))
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("Collection '{}' does not exist", collection),
            })?;

        Ok(row.try_get::<Uuid>("", "uuid")?)
    }
}

/// Render a vector in pgvector's text format: "[1,2,3]"
pub fn format_vector(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Parse pgvector's text format back into floats
pub fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|v| {
            v.trim().parse::<f32>().map_err(|e| AppError::Internal {
                message: format!("Malformed vector component '{}': {}", v.trim(), e),
            })
        })
        .collect()
}

fn row_document(row: &sea_orm::QueryResult) -> Result<Document> {
    let page_content = row
        .try_get::<Option<String>>("", "document")?
        .unwrap_or_default();
    let metadata = match row.try_get::<Option<serde_json::Value>>("", "cmetadata")? {
        Some(serde_json::Value::Object(map)) => map,
        _ => Metadata::new(),
    };
    Ok(Document {
        page_content,
        metadata,
    })
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.db
            .conn()
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO langchain_pg_collection (uuid, name)
                VALUES ($1, $2)
                ON CONFLICT (name) DO NOTHING
                "#,
                vec![Uuid::new_v4().into(), collection.into()],
            ))
            .await?;
        Ok(())
    }

    async fn add_documents(&self, collection: &str, docs: &[Document]) -> Result<Vec<String>> {
        let collection_id = self.collection_id(collection).await?;

        let texts: Vec<String> = docs.iter().map(|d| d.page_content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != docs.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Expected {} embeddings, received {}",
                    docs.len(),
                    embeddings.len()
                ),
            });
        }

        // One transaction: either every chunk gets an id or none is stored
        let txn = self.db.conn().begin().await?;
        let mut ids = Vec::with_capacity(docs.len());

        for (doc, embedding) in docs.iter().zip(embeddings) {
            let id = Uuid::new_v4().to_string();
            txn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO langchain_pg_embedding (id, collection_id, embedding, document, cmetadata)
                VALUES ($1, $2, $3::vector, $4, $5)
                "#,
                vec![
                    id.clone().into(),
                    collection_id.into(),
                    format_vector(&embedding).into(),
                    doc.page_content.clone().into(),
                    serde_json::Value::Object(doc.metadata.clone()).into(),
                ],
            ))
            .await?;
            ids.push(id);
        }

        txn.commit().await?;

        debug!(collection = %collection, count = ids.len(), "Documents stored");
        Ok(ids)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<bool> {
        let collection_id = self.collection_id(collection).await?;

        let placeholders = (0..ids.len())
            .map(|i| format!("${}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM langchain_pg_embedding WHERE collection_id = $1 AND id IN ({})",
            placeholders
        );

        let mut values: Vec<sea_orm::Value> = Vec::with_capacity(ids.len() + 1);
        values.push(collection_id.into());
        values.extend(ids.iter().map(|id| id.clone().into()));

        let result = self
            .db
            .conn()
            .execute(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Document>> {
        let collection_id = self.collection_id(collection).await?;
        let embedding = self.embedder.embed(query).await?;

        let start = Instant::now();
        let rows = self
            .db
            .conn()
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                SELECT document, cmetadata
                FROM langchain_pg_embedding
                WHERE collection_id = $1
                ORDER BY embedding <=> $2::vector
                LIMIT $3
                "#,
                vec![
                    collection_id.into(),
                    format_vector(&embedding).into(),
                    (k as i64).into(),
                ],
            ))
            .await?;

        let docs = rows.iter().map(row_document).collect::<Result<Vec<_>>>()?;

        debug!(
            collection = %collection,
            k = k,
            found = docs.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Similarity search complete"
        );

        Ok(docs)
    }

    async fn search_candidates(
        &self,
        collection: &str,
        query: &str,
        fetch_k: usize,
    ) -> Result<Candidates> {
        let collection_id = self.collection_id(collection).await?;
        let query_embedding = self.embedder.embed(query).await?;

        let rows = self
            .db
            .conn()
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                SELECT document, cmetadata, embedding::text AS embedding,
                       1 - (embedding <=> $2::vector) AS score
                FROM langchain_pg_embedding
                WHERE collection_id = $1
                ORDER BY embedding <=> $2::vector
                LIMIT $3
                "#,
                vec![
                    collection_id.into(),
                    format_vector(&query_embedding).into(),
                    (fetch_k as i64).into(),
                ],
            ))
            .await?;

        let hits = rows
            .iter()
            .map(|row| -> Result<Candidate> {
                let embedding = match row.try_get::<Option<String>>("", "embedding")? {
                    Some(raw) => parse_vector(&raw)?,
                    None => Vec::new(),
                };
                let score = row.try_get::<Option<f64>>("", "score")?.unwrap_or_default();
                Ok(Candidate {
                    document: row_document(row)?,
                    embedding,
                    score: score as f32,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(collection = %collection, fetch_k = fetch_k, found = hits.len(), "Candidate search complete");

        Ok(Candidates {
            query_embedding,
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_format() {
        assert_eq!(format_vector(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(format_vector(&[]), "[]");
    }

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("[0.5,-1,2e-3]").unwrap(), vec![0.5, -1.0, 0.002]);
        assert!(parse_vector("[]").unwrap().is_empty());
        assert_eq!(parse_vector(&format_vector(&[0.25, 4.0])).unwrap(), vec![0.25, 4.0]);
        assert!(matches!(
            parse_vector("[1,abc]"),
            Err(AppError::Internal { .. })
        ));
    }
}
