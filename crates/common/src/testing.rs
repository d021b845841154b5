//! In-memory collaborators for tests
//!
//! Both stubs record every call so tests can assert which collaborators a
//! pipeline touched, with which arguments, and how often.

use crate::errors::{AppError, Result};
use crate::llm::{ChatMessage, ChatModel, DeltaStream, Generation, GenerationDelta, GenerationParams};
use crate::vectorstore::mmr::cosine_similarity;
use crate::vectorstore::{Candidate, Candidates, Document, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-operation call counts of a `RecordingStore`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub ensure: usize,
    pub add: usize,
    pub delete: usize,
    pub search: usize,
    pub candidates: usize,
}

/// Arguments of one similarity search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
    pub collection: String,
    pub query: String,
    pub k: usize,
}

#[derive(Default)]
struct StoreState {
    calls: StoreCalls,
    searches: Vec<SearchCall>,
    deletes: Vec<Vec<String>>,
    collections: HashMap<String, Vec<(String, Document)>>,
    embeddings: HashMap<String, Vec<f32>>,
    next_id: usize,
}

/// Vector store kept in memory
///
/// Search returns the first `k` documents in insertion order. Ids are
/// `id-0`, `id-1`, ... across all collections. Candidate search ranks
/// seeded embeddings by cosine similarity to a fixed query embedding.
#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<StoreState>,
    failure: Option<String>,
    delete_result: Option<bool>,
    query_embedding: Vec<f32>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every add, delete and search with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Force the delete result instead of reporting whether anything matched
    pub fn with_delete_result(mut self, result: bool) -> Self {
        self.delete_result = Some(result);
        self
    }

    /// Seed a collection
    pub fn with_documents(self, collection: &str, docs: Vec<Document>) -> Self {
        {
            let mut state = lock(&self.state);
            for doc in docs {
                let id = format!("id-{}", state.next_id);
                state.next_id += 1;
                state
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .push((id, doc));
            }
        }
        self
    }

    /// Embedding every candidate search treats as the query's
    pub fn with_query_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = embedding;
        self
    }

    /// Seed a collection with documents and their embeddings
    pub fn with_embedded_documents(self, collection: &str, docs: Vec<(Document, Vec<f32>)>) -> Self {
        {
            let mut state = lock(&self.state);
            for (doc, embedding) in docs {
                let id = format!("id-{}", state.next_id);
                state.next_id += 1;
                state.embeddings.insert(id.clone(), embedding);
                state
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .push((id, doc));
            }
        }
        self
    }

    pub fn calls(&self) -> StoreCalls {
        lock(&self.state).calls
    }

    pub fn searches(&self) -> Vec<SearchCall> {
        lock(&self.state).searches.clone()
    }

    /// Id lists passed to `delete`, in call order
    pub fn deletes(&self) -> Vec<Vec<String>> {
        lock(&self.state).deletes.clone()
    }

    /// Stored documents of a collection, in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.state)
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default()
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(AppError::Internal {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.ensure += 1;
        state.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn add_documents(&self, collection: &str, docs: &[Document]) -> Result<Vec<String>> {
        lock(&self.state).calls.add += 1;
        self.check_failure()?;

        let mut state = lock(&self.state);
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = format!("id-{}", state.next_id);
            state.next_id += 1;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push((id.clone(), doc.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<bool> {
        {
            let mut state = lock(&self.state);
            state.calls.delete += 1;
            state.deletes.push(ids.to_vec());
        }
        self.check_failure()?;

        let mut state = lock(&self.state);
        let removed = match state.collections.get_mut(collection) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|(id, _)| !ids.contains(id));
                before != docs.len()
            }
            None => false,
        };
        Ok(self.delete_result.unwrap_or(removed))
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Document>> {
        {
            let mut state = lock(&self.state);
            state.calls.search += 1;
            state.searches.push(SearchCall {
                collection: collection.to_string(),
                query: query.to_string(),
                k,
            });
        }
        self.check_failure()?;

        Ok(self
            .documents(collection)
            .into_iter()
            .take(k)
            .collect())
    }

    async fn search_candidates(
        &self,
        collection: &str,
        query: &str,
        fetch_k: usize,
    ) -> Result<Candidates> {
        {
            let mut state = lock(&self.state);
            state.calls.candidates += 1;
            state.searches.push(SearchCall {
                collection: collection.to_string(),
                query: query.to_string(),
                k: fetch_k,
            });
        }
        self.check_failure()?;

        let state = lock(&self.state);
        let mut hits: Vec<Candidate> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| {
                        let embedding = state.embeddings.get(id).cloned().unwrap_or_default();
                        Candidate {
                            score: cosine_similarity(&self.query_embedding, &embedding),
                            document: doc.clone(),
                            embedding,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(fetch_k);

        Ok(Candidates {
            query_embedding: self.query_embedding.clone(),
            hits,
        })
    }
}

/// One scripted step of a streamed generation
#[derive(Debug, Clone)]
pub enum StreamStep {
    Delta(GenerationDelta),
    Fail(String),
}

/// Per-operation call counts of a `ScriptedModel`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCalls {
    pub generate: usize,
    pub stream: usize,
}

#[derive(Default)]
struct ModelState {
    calls: ModelCalls,
    last_request: Option<(String, Vec<ChatMessage>, GenerationParams)>,
}

/// Chat model that replays a fixed script
pub struct ScriptedModel {
    generation: std::result::Result<Generation, String>,
    steps: Vec<StreamStep>,
    state: Mutex<ModelState>,
}

impl ScriptedModel {
    fn scripted(
        generation: std::result::Result<Generation, String>,
        steps: Vec<StreamStep>,
    ) -> Self {
        Self {
            generation,
            steps,
            state: Mutex::new(ModelState::default()),
        }
    }

    /// Generates `content`; streams it as a single token
    pub fn replying(content: &str) -> Self {
        Self::scripted(
            Ok(Generation {
                content: content.to_string(),
                ..Generation::default()
            }),
            vec![StreamStep::Delta(GenerationDelta::text(content))],
        )
    }

    pub fn with_generation(generation: Generation) -> Self {
        let steps = vec![StreamStep::Delta(GenerationDelta::text(generation.content.clone()))];
        Self::scripted(Ok(generation), steps)
    }

    /// Generates the concatenation; streams one token per entry
    pub fn streaming(tokens: &[&str]) -> Self {
        Self::scripted(
            Ok(Generation {
                content: tokens.concat(),
                ..Generation::default()
            }),
            tokens
                .iter()
                .map(|t| StreamStep::Delta(GenerationDelta::text(*t)))
                .collect(),
        )
    }

    pub fn with_steps(steps: Vec<StreamStep>) -> Self {
        Self::scripted(Ok(Generation::default()), steps)
    }

    /// Both `generate` and opening a stream fail with `message`
    pub fn failing(message: &str) -> Self {
        Self::scripted(Err(message.to_string()), Vec::new())
    }

    pub fn calls(&self) -> ModelCalls {
        lock(&self.state).calls
    }

    /// Model name, prompt and params of the most recent call
    pub fn last_request(&self) -> Option<(String, Vec<ChatMessage>, GenerationParams)> {
        lock(&self.state).last_request.clone()
    }

    fn record(&self, model: &str, messages: &[ChatMessage], params: &GenerationParams) {
        lock(&self.state).last_request =
            Some((model.to_string(), messages.to_vec(), params.clone()));
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Generation> {
        lock(&self.state).calls.generate += 1;
        self.record(model, messages, params);

        self.generation.clone().map_err(|message| AppError::LlmError { message })
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<DeltaStream> {
        lock(&self.state).calls.stream += 1;
        self.record(model, messages, params);

        if let Err(message) = &self.generation {
            return Err(AppError::LlmError {
                message: message.clone(),
            });
        }

        let items: Vec<Result<GenerationDelta>> = self
            .steps
            .iter()
            .cloned()
            .map(|step| match step {
                StreamStep::Delta(delta) => Ok(delta),
                StreamStep::Fail(message) => Err(AppError::LlmError { message }),
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(items)))
    }
}
