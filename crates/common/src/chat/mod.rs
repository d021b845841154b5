//! Retrieval-augmented chat
//!
//! Wire types for the chat endpoints plus the request pipeline that
//! retrieves context, assembles the prompt and drives generation.

pub mod pipeline;
pub mod prompt;

use crate::llm::Usage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use validator::Validate;

pub use pipeline::{EventStream, RagPipeline};

/// One conversation turn as received over the wire
///
/// The role stays a plain string here; it is checked when the prompt is
/// assembled so an unknown role is reported as an invalid request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, message = "messages must not be empty"))]
    pub messages: Vec<Message>,

    /// Falls back to the configured default model
    #[serde(default)]
    pub model_name: Option<String>,

    /// Collection to retrieve context from
    #[serde(default)]
    pub vector_index: Option<String>,

    #[serde(default = "default_k")]
    #[validate(range(min = 1, message = "k must be at least 1"))]
    pub k: usize,

    /// Extra generation options (temperature, max_tokens, ...)
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

fn default_k() -> usize {
    10
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model_name: None,
            vector_index: None,
            k: default_k(),
            kwargs: Map::new(),
        }
    }

    pub fn with_vector_index(mut self, vector_index: impl Into<String>, k: usize) -> Self {
        self.vector_index = Some(vector_index.into());
        self.k = k;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// One server-sent event of a streamed chat response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Reasoning(String),
    Error(String),
    /// Terminal sentinel, never sent after an error
    Done,
}

impl StreamEvent {
    /// The `data:` payload for this event
    pub fn payload(&self) -> String {
        match self {
            StreamEvent::Token(token) => json!({ "token": token }).to_string(),
            StreamEvent::Reasoning(text) => json!({ "reasoning": text }).to_string(),
            StreamEvent::Error(message) => json!({ "error": message }).to_string(),
            StreamEvent::Done => "[DONE]".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(request.k, 10);
        assert!(request.model_name.is_none());
        assert!(request.vector_index.is_none());
        assert!(request.kwargs.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let request = ChatRequest::new(vec![]);
        assert!(request.validate().is_err());

        let request = ChatRequest::new(vec![Message::new("user", "hi")]).with_vector_index("docs", 0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let response = ChatResponse {
            content: "hello".to_string(),
            model_name: "gpt-5-mini".to_string(),
            usage: None,
            reasoning: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"content": "hello", "model_name": "gpt-5-mini"}));
    }

    #[test]
    fn test_event_payloads() {
        assert_eq!(StreamEvent::Token("A".into()).payload(), r#"{"token":"A"}"#);
        assert_eq!(
            StreamEvent::Reasoning("why".into()).payload(),
            r#"{"reasoning":"why"}"#
        );
        assert_eq!(StreamEvent::Error("boom".into()).payload(), r#"{"error":"boom"}"#);
        assert_eq!(StreamEvent::Done.payload(), "[DONE]");
    }
}
