//! Retrieval-augmented request pipeline
//!
//! Retrieval completes (or is skipped) before the prompt is assembled, and
//! the prompt is complete before the model is called. Collaborator errors
//! are wrapped once at this boundary and never retried.

use super::prompt::{build_prompt, retrieval_query};
use super::{ChatRequest, ChatResponse, StreamEvent};
use crate::errors::{AppError, Result};
use crate::llm::{ChatMessage, ChatModel, GenerationParams};
use crate::metrics;
use crate::vectorstore::{Collection, Document, VectorStore};
use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Events of one streamed response, in emission order
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Chat pipeline over a vector store and a chat model
#[derive(Clone)]
pub struct RagPipeline {
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ChatModel>,
    default_model: String,
}

/// Everything generation needs, resolved before the model is called
struct Prepared {
    model_name: String,
    messages: Vec<ChatMessage>,
    params: GenerationParams,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn VectorStore>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            model,
            default_model: crate::DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    /// Model used when a request does not name one
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Single complete response
    #[instrument(skip(self, request), fields(vector_index = ?request.vector_index, k = request.k))]
    pub async fn respond(&self, request: ChatRequest) -> Result<ChatResponse> {
        let prepared = self.prepare(request).await?;

        let start = Instant::now();
        let result = self
            .model
            .generate(&prepared.model_name, &prepared.messages, &prepared.params)
            .await;
        metrics::record_generation(
            start.elapsed().as_secs_f64(),
            &prepared.model_name,
            result.is_ok(),
        );

        let generation = result.map_err(|e| AppError::GenerationFailure {
            message: e.to_string(),
        })?;

        info!(
            model = %prepared.model_name,
            latency_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );

        let reasoning = generation.reasoning();
        Ok(ChatResponse {
            content: generation.content,
            model_name: prepared.model_name,
            usage: generation.usage,
            reasoning,
        })
    }

    /// Token-streamed response
    ///
    /// Errors returned here happened before the first event. Once the
    /// stream exists, a generation failure becomes a single `Error` event
    /// and the stream ends without `Done`.
    #[instrument(skip(self, request), fields(vector_index = ?request.vector_index, k = request.k))]
    pub async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        let prepared = self.prepare(request).await?;
        let model = Arc::clone(&self.model);

        let events = stream! {
            let start = Instant::now();

            let mut deltas = match model
                .stream(&prepared.model_name, &prepared.messages, &prepared.params)
                .await
            {
                Ok(deltas) => deltas,
                Err(e) => {
                    warn!(error = %e, model = %prepared.model_name, "Generation stream failed to open");
                    metrics::record_generation(start.elapsed().as_secs_f64(), &prepared.model_name, false);
                    yield StreamEvent::Error(generation_failure(e));
                    return;
                }
            };

            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        if let Some(token) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                            yield StreamEvent::Token(token.to_string());
                        }
                        if let Some(reasoning) = delta.reasoning() {
                            yield StreamEvent::Reasoning(reasoning);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, model = %prepared.model_name, "Generation stream failed");
                        metrics::record_generation(start.elapsed().as_secs_f64(), &prepared.model_name, false);
                        yield StreamEvent::Error(generation_failure(e));
                        return;
                    }
                }
            }

            metrics::record_generation(start.elapsed().as_secs_f64(), &prepared.model_name, true);
            debug!(model = %prepared.model_name, "Generation stream complete");
            yield StreamEvent::Done;
        };

        Ok(Box::pin(events))
    }

    async fn prepare(&self, request: ChatRequest) -> Result<Prepared> {
        request.validate().map_err(|e| AppError::InvalidRequest {
            message: e.to_string(),
        })?;
        let params = GenerationParams::new(request.kwargs)?;

        let context = match request
            .vector_index
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            Some(name) => {
                self.retrieve(name, retrieval_query(&request.messages), request.k)
                    .await?
            }
            None => Vec::new(),
        };

        let messages = build_prompt(&request.messages, &context)?;

        Ok(Prepared {
            model_name: request
                .model_name
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            params,
        })
    }

    async fn retrieve(&self, collection: &str, query: &str, k: usize) -> Result<Vec<Document>> {
        let start = Instant::now();

        let result = async {
            let bound = Collection::bind(Arc::clone(&self.store), collection).await?;
            bound.similarity_search(query, k).await
        }
        .await;

        match result {
            Ok(docs) => {
                metrics::record_retrieval(start.elapsed().as_secs_f64(), collection, docs.len());
                Ok(docs)
            }
            Err(e) => {
                warn!(error = %e, collection = %collection, "Retrieval failed");
                Err(AppError::RetrievalFailure {
                    message: e.to_string(),
                })
            }
        }
    }
}

fn generation_failure(e: AppError) -> String {
    AppError::GenerationFailure {
        message: e.to_string(),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use crate::llm::{Generation, GenerationDelta, Usage};
    use crate::testing::{RecordingStore, ScriptedModel, StreamStep};
    use crate::vectorstore::Metadata;
    use serde_json::{json, Map};

    fn pipeline(store: &Arc<RecordingStore>, model: &Arc<ScriptedModel>) -> RagPipeline {
        RagPipeline::new(store.clone(), model.clone())
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::new("system", "be brief"),
            Message::new("user", "what is rust"),
            Message::new("assistant", "a language"),
            Message::new("user", "who made it"),
        ]
    }

    async fn collect(stream: EventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_empty_messages_rejected_before_any_call() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("unused"));
        let pipeline = pipeline(&store, &model);

        let request = ChatRequest::new(vec![]).with_vector_index("docs", 3);
        assert!(matches!(
            pipeline.respond(request.clone()).await,
            Err(AppError::InvalidRequest { .. })
        ));
        assert!(matches!(
            pipeline.stream(request).await,
            Err(AppError::InvalidRequest { .. })
        ));

        assert_eq!(store.calls().search, 0);
        assert_eq!(store.calls().ensure, 0);
        assert_eq!(model.calls().generate, 0);
        assert_eq!(model.calls().stream, 0);
    }

    #[tokio::test]
    async fn test_no_vector_index_skips_retrieval() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("hello"));

        let response = pipeline(&store, &model)
            .respond(ChatRequest::new(conversation()))
            .await
            .unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.model_name, "gpt-5-mini");
        assert_eq!(store.calls().ensure, 0);
        assert_eq!(store.calls().search, 0);

        let (_, messages, _) = model.last_request().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system("be brief"));
    }

    #[tokio::test]
    async fn test_retrieval_uses_last_user_message_and_k() {
        let store = Arc::new(RecordingStore::new().with_documents(
            "docs",
            vec![
                Document::new("chunk one", Metadata::new()),
                Document::new("chunk two", Metadata::new()),
            ],
        ));
        let model = Arc::new(ScriptedModel::replying("Graydon"));

        pipeline(&store, &model)
            .respond(ChatRequest::new(conversation()).with_vector_index("docs", 7))
            .await
            .unwrap();

        let searches = store.searches();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].collection, "docs");
        assert_eq!(searches[0].query, "who made it");
        assert_eq!(searches[0].k, 7);

        let (_, messages, _) = model.last_request().unwrap();
        assert_eq!(messages.len(), 5);
        assert!(messages[0].content.ends_with("chunk one\n\n---\n\nchunk two"));
        assert_eq!(messages[1], ChatMessage::system("be brief"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_adds_no_context_message() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("ok"));

        pipeline(&store, &model)
            .respond(ChatRequest::new(conversation()).with_vector_index("empty", 3))
            .await
            .unwrap();

        let (_, messages, _) = model.last_request().unwrap();
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_retrieval_failure_wrapped() {
        let store = Arc::new(RecordingStore::new().failing("connection refused"));
        let model = Arc::new(ScriptedModel::replying("unused"));

        let err = pipeline(&store, &model)
            .respond(ChatRequest::new(conversation()).with_vector_index("docs", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RetrievalFailure { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(model.calls().generate, 0);
    }

    #[tokio::test]
    async fn test_unknown_role_is_invalid_request() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("unused"));

        let err = pipeline(&store, &model)
            .respond(ChatRequest::new(vec![Message::new("tool", "x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest { .. }));
        assert_eq!(model.calls().generate, 0);
    }

    #[tokio::test]
    async fn test_reserved_kwargs_rejected() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("unused"));

        let mut request = ChatRequest::new(conversation());
        request.kwargs.insert("stream".to_string(), json!(false));

        assert!(matches!(
            pipeline(&store, &model).respond(request).await,
            Err(AppError::InvalidRequest { .. })
        ));
        assert_eq!(model.calls().generate, 0);
    }

    #[tokio::test]
    async fn test_response_carries_usage_reasoning_and_kwargs() {
        let mut extra = Map::new();
        extra.insert("reasoning_content".to_string(), json!("thought"));
        let model = Arc::new(ScriptedModel::with_generation(Generation {
            content: "answer".to_string(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            }),
            extra,
        }));
        let store = Arc::new(RecordingStore::new());

        let mut request = ChatRequest::new(conversation());
        request.model_name = Some("gpt-4o".to_string());
        request.kwargs.insert("temperature".to_string(), json!(0.3));

        let response = pipeline(&store, &model).respond(request).await.unwrap();
        assert_eq!(response.model_name, "gpt-4o");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
        assert_eq!(response.reasoning.as_deref(), Some("thought"));

        let (model_name, _, params) = model.last_request().unwrap();
        assert_eq!(model_name, "gpt-4o");
        assert_eq!(params.as_map()["temperature"], json!(0.3));
    }

    #[tokio::test]
    async fn test_generation_failure_wrapped() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::failing("quota exceeded"));

        let err = pipeline(&store, &model)
            .respond(ChatRequest::new(conversation()))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationFailure { .. }));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_default_model_configurable() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::replying("ok"));

        let response = pipeline(&store, &model)
            .with_default_model("gpt-4.1")
            .respond(ChatRequest::new(conversation()))
            .await
            .unwrap();
        assert_eq!(response.model_name, "gpt-4.1");
    }

    #[tokio::test]
    async fn test_stream_tokens_then_done() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::streaming(&["A", "B", "C"]));

        let events = collect(
            pipeline(&store, &model)
                .stream(ChatRequest::new(conversation()))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("A".into()),
                StreamEvent::Token("B".into()),
                StreamEvent::Token("C".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_error_has_no_done() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::with_steps(vec![
            StreamStep::Delta(GenerationDelta::text("A")),
            StreamStep::Fail("connection reset".to_string()),
            StreamStep::Delta(GenerationDelta::text("never")),
        ]));

        let events = collect(
            pipeline(&store, &model)
                .stream(ChatRequest::new(conversation()))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Token("A".into()));
        match &events[1] {
            StreamEvent::Error(message) => assert!(message.contains("connection reset")),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_in_band() {
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::failing("unauthorized"));

        let events = collect(
            pipeline(&store, &model)
                .stream(ChatRequest::new(conversation()))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_stream_reasoning_follows_token_and_empty_tokens_skipped() {
        let mut extra = Map::new();
        extra.insert("reasoning".to_string(), json!("hmm"));
        let store = Arc::new(RecordingStore::new());
        let model = Arc::new(ScriptedModel::with_steps(vec![
            StreamStep::Delta(GenerationDelta {
                content: Some("X".to_string()),
                extra,
            }),
            StreamStep::Delta(GenerationDelta::text("")),
        ]));

        let events = collect(
            pipeline(&store, &model)
                .stream(ChatRequest::new(conversation()))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("X".into()),
                StreamEvent::Reasoning("hmm".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_retrieval_failure_before_first_event() {
        let store = Arc::new(RecordingStore::new().failing("db down"));
        let model = Arc::new(ScriptedModel::streaming(&["unused"]));

        let result = pipeline(&store, &model)
            .stream(ChatRequest::new(conversation()).with_vector_index("docs", 2))
            .await;

        assert!(matches!(result, Err(AppError::RetrievalFailure { .. })));
        assert_eq!(model.calls().stream, 0);
    }
}
