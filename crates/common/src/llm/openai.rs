//! OpenAI-compatible chat completions client

use super::{ChatMessage, ChatModel, DeltaStream, Generation, GenerationDelta, GenerationParams, Usage};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Chat model backed by `{api_base}/chat/completions`
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[derive(Deserialize, Default)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: WireMessage,
}

impl OpenAIChatModel {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("API error {}: {}", status, body),
            });
        }

        Ok(response)
    }
}

/// Caller options first, then the fields the client owns
fn build_payload(
    model: &str,
    messages: &[ChatMessage],
    params: &GenerationParams,
    stream: bool,
) -> Result<Value> {
    let mut body = params.as_map().clone();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), serde_json::to_value(messages)?);
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    Ok(Value::Object(body))
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Generation> {
        let payload = build_payload(model, messages, params, false)?;
        let response = self.send(&payload).await?;

        let result: CompletionResponse =
            response.json().await.map_err(|e| AppError::LlmError {
                message: format!("Failed to parse response: {}", e),
            })?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LlmError {
                message: "Response contained no choices".to_string(),
            })?;

        Ok(Generation {
            content: choice.message.content.unwrap_or_default(),
            usage: result.usage.map(Usage::from),
            extra: choice.message.extra,
        })
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<DeltaStream> {
        let payload = build_payload(model, messages, params, true)?;
        let response = self.send(&payload).await?;
        debug!(model = %model, "Generation stream opened");

        Ok(Box::pin(decode_stream(response.bytes_stream())))
    }
}

/// Turn a raw server-sent-event body into generation increments
fn decode_stream<S, B, E>(body: S) -> impl Stream<Item = Result<GenerationDelta>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        let mut done = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AppError::LlmError {
                message: format!("Stream interrupted: {}", e),
            })?;

            for frame in decoder.push(chunk.as_ref()) {
                match frame {
                    SseFrame::Done => {
                        done = true;
                        break;
                    }
                    SseFrame::Data(data) => {
                        for delta in parse_chunk(&data)? {
                            yield delta;
                        }
                    }
                }
            }

            if done {
                break;
            }
        }

        if !done {
            if let Some(SseFrame::Data(data)) = decoder.finish() {
                for delta in parse_chunk(&data)? {
                    yield delta;
                }
            }
        }
    }
}

fn parse_chunk(data: &str) -> Result<Vec<GenerationDelta>> {
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| AppError::LlmError {
        message: format!("Malformed stream chunk: {}", e),
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .map(|choice| GenerationDelta {
            content: choice.delta.content,
            extra: choice.delta.extra,
        })
        .collect())
}

#[derive(Debug, PartialEq)]
enum SseFrame {
    Data(String),
    Done,
}

/// Incremental `text/event-stream` reader
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(line.trim_end_matches(|c: char| c == '\n' || c == '\r')) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush whatever is left once the body ends
    fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim_end_matches(|c: char| c == '\n' || c == '\r');
        if !rest.is_empty() {
            if let Some(frame) = self.line(rest) {
                return Some(frame);
            }
        }
        self.flush()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.flush();
        }
        // Comments and non-data fields are ignored
        if let Some(data) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(data.trim_start());
        }
        None
    }

    fn flush(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data);
        if data.trim() == "[DONE]" {
            Some(SseFrame::Done)
        } else {
            Some(SseFrame::Data(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(chunks: &[&str]) -> Vec<std::result::Result<Vec<u8>, std::io::Error>> {
        chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_payload_params_cannot_shadow_owned_fields() {
        let mut params = Map::new();
        params.insert("temperature".to_string(), json!(0.1));
        let params = GenerationParams::new(params).unwrap();

        let payload =
            build_payload("gpt-5-mini", &[ChatMessage::user("hi")], &params, true).unwrap();
        assert_eq!(payload["model"], "gpt-5-mini");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["temperature"], 0.1);
        assert_eq!(payload["messages"][0]["role"], "user");

        let payload = build_payload("m", &[], &GenerationParams::default(), false).unwrap();
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\n").is_empty());
        let frames = decoder.push(b"\n: keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Data("{\"a\":1}".to_string()), SseFrame::Done]
        );
    }

    #[test]
    fn test_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {}").is_empty());
        assert_eq!(decoder.finish(), Some(SseFrame::Data("{}".to_string())));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_completion_response_keeps_extra_fields() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hi", "reasoning_content": "think"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        let usage = Usage::from(parsed.usage.unwrap());
        assert_eq!(usage.total_tokens, 5);
        let message = &parsed.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("hi"));
        assert_eq!(message.extra["reasoning_content"], "think");
    }

    #[tokio::test]
    async fn test_decode_stream_yields_deltas_in_order() {
        let chunks = body(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"A\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\",\"reasoning\":\"r\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);
        let deltas: Vec<_> = decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(deltas.len(), 2);
        let first = deltas[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("A"));
        let second = deltas[1].as_ref().unwrap();
        assert_eq!(second.content.as_deref(), Some("B"));
        assert_eq!(second.reasoning().as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_decode_stream_surfaces_malformed_chunk() {
        let chunks = body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
            "data: not-json\n\n",
        ]);
        let deltas: Vec<_> = decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].is_ok());
        assert!(matches!(deltas[1], Err(AppError::LlmError { .. })));
    }
}
