//! Generation collaborator
//!
//! `ChatModel` is the seam between the chat pipeline and a hosted
//! chat-completions service. Results carry the provider's supplementary
//! fields untouched in `extra`; reasoning text is pulled out of them on a
//! best-effort basis.

pub mod openai;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

pub use openai::OpenAIChatModel;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(AppError::InvalidRequest {
                message: format!(
                    "Unknown message role '{}'. Valid roles: 'system', 'user', 'assistant'",
                    other
                ),
            }),
        }
    }
}

/// A role-tagged message as sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request fields owned by the client itself; callers may not set them
pub const RESERVED_PARAMS: &[&str] = &["model", "messages", "stream", "stream_options"];

/// Caller-supplied generation options, forwarded verbatim
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams(Map<String, Value>);

impl GenerationParams {
    /// Accept any option except the reserved request fields
    pub fn new(params: Map<String, Value>) -> Result<Self> {
        if let Some(key) = params
            .keys()
            .find(|key| RESERVED_PARAMS.contains(&key.as_str()))
        {
            return Err(AppError::InvalidRequest {
                message: format!("kwargs may not override the reserved field '{}'", key),
            });
        }
        Ok(Self(params))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Token accounting for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// A complete model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub content: String,
    pub usage: Option<Usage>,
    /// Provider fields beyond content, kept as received
    pub extra: Map<String, Value>,
}

impl Generation {
    pub fn reasoning(&self) -> Option<String> {
        extract_reasoning(&self.extra)
    }
}

/// One streamed increment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationDelta {
    pub content: Option<String>,
    pub extra: Map<String, Value>,
}

impl GenerationDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            extra: Map::new(),
        }
    }

    pub fn reasoning(&self) -> Option<String> {
        extract_reasoning(&self.extra)
    }
}

/// Increments in the order the provider produced them
pub type DeltaStream = BoxStream<'static, Result<GenerationDelta>>;

/// Trait for hosted chat models
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a complete response
    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Generation>;

    /// Start a streamed response
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<DeltaStream>;
}

/// Supplementary fields that may carry a reasoning trace, checked in order
pub const REASONING_FIELDS: &[&str] = &["reasoning_content", "reasoning", "thinking"];

const PART_TEXT_FIELDS: &[&str] = &["text", "content", "summary"];

/// Best-effort reasoning text; unrecognized shapes yield `None`
pub fn extract_reasoning(extra: &Map<String, Value>) -> Option<String> {
    REASONING_FIELDS
        .iter()
        .filter_map(|field| extra.get(*field))
        .find_map(reasoning_text)
}

fn reasoning_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<String> = parts.iter().filter_map(reasoning_text).collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        Value::Object(part) => PART_TEXT_FIELDS
            .iter()
            .filter_map(|field| part.get(*field))
            .find_map(reasoning_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extra(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        let err = "tool".parse::<Role>().unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { .. }));
        assert!(err.to_string().contains("'tool'"));
    }

    #[test]
    fn test_messages_serialize_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_params_reject_reserved_keys_only() {
        let ok = GenerationParams::new(extra(json!({"temperature": 0.2, "top_k": 5})));
        assert_eq!(ok.unwrap().as_map().len(), 2);

        for key in RESERVED_PARAMS {
            let mut map = Map::new();
            map.insert(key.to_string(), json!(true));
            assert!(matches!(
                GenerationParams::new(map),
                Err(AppError::InvalidRequest { .. })
            ));
        }
    }

    #[test]
    fn test_reasoning_from_string_field() {
        let fields = extra(json!({"reasoning_content": "step one"}));
        assert_eq!(extract_reasoning(&fields).as_deref(), Some("step one"));
    }

    #[test]
    fn test_reasoning_from_parts() {
        let fields = extra(json!({
            "reasoning": {"summary": [{"type": "summary_text", "text": "a"}, {"text": "b"}]}
        }));
        assert_eq!(extract_reasoning(&fields).as_deref(), Some("a\nb"));

        let fields = extra(json!({"thinking": [{"content": "c"}]}));
        assert_eq!(extract_reasoning(&fields).as_deref(), Some("c"));
    }

    #[test]
    fn test_reasoning_absent_or_unrecognized() {
        assert!(extract_reasoning(&Map::new()).is_none());
        assert!(extract_reasoning(&extra(json!({"reasoning": 42}))).is_none());
        assert!(extract_reasoning(&extra(json!({"reasoning": ""}))).is_none());
        assert!(extract_reasoning(&extra(json!({"refusal": "no"}))).is_none());
    }
}
