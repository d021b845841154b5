//! Hosted parsing service client
//!
//! Protocol: upload the file, poll the job until it settles, then fetch the
//! result in the configured result type.

use super::{DocumentParser, ImageMap, OutputFormat, ParsedDocument};
use crate::errors::ParserError;
use asynx_common::config::IngestionConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Separator between documents of a multi-document result
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Markdown,
    Text,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Markdown => "markdown",
            ResultType::Text => "text",
        }
    }

    fn format(&self) -> OutputFormat {
        match self {
            ResultType::Markdown => OutputFormat::Markdown,
            ResultType::Text => OutputFormat::Text,
        }
    }
}

pub struct HostedParser {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    result_type: ResultType,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
    #[serde(default)]
    status: String,
}

/// Where a parsing job stands after one poll
#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    Succeeded,
    Failed(String),
}

fn job_state(status: &str) -> JobState {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" => JobState::Succeeded,
        "ERROR" | "CANCELED" | "CANCELLED" => JobState::Failed(status.to_string()),
        _ => JobState::Pending,
    }
}

impl HostedParser {
    pub fn new(config: &IngestionConfig) -> Result<Self, ParserError> {
        let api_key = config
            .llama_cloud_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ParserError::Init(
                    "LLAMA_CLOUD_API_KEY is not set. Add it to your environment to use the 'speed' parser strategy."
                        .to_string(),
                )
            })?
            .to_string();

        let result_type = match config.result_type.as_str() {
            "markdown" => ResultType::Markdown,
            "text" => ResultType::Text,
            other => {
                return Err(ParserError::Init(format!(
                    "Unknown result type '{}'. Choose from: 'markdown', 'text'",
                    other
                )))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ParserError::Init(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.llama_cloud_base_url.trim_end_matches('/').to_string(),
            result_type,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls.max(1),
        })
    }

    async fn upload(&self, path: &Path) -> Result<String, ParserError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| ParserError::Conversion(e.to_string()))?;
        let form = Form::new().part("file", part);

        let job: JobResponse = self
            .send(
                self.client
                    .post(format!("{}/api/parsing/upload", self.base_url))
                    .multipart(form),
            )
            .await?;

        debug!(job_id = %job.id, "Parsing job submitted");
        Ok(job.id)
    }

    async fn wait_for(&self, job_id: &str) -> Result<(), ParserError> {
        for attempt in 0..self.max_polls {
            let job: JobResponse = self
                .send(
                    self.client
                        .get(format!("{}/api/parsing/job/{}", self.base_url, job_id)),
                )
                .await?;

            match job_state(&job.status) {
                JobState::Succeeded => return Ok(()),
                JobState::Failed(status) => {
                    return Err(ParserError::Conversion(format!(
                        "Parsing job {} ended with status {}",
                        job_id, status
                    )))
                }
                JobState::Pending => {
                    debug!(job_id = %job_id, attempt = attempt, "Parsing job pending");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(ParserError::Conversion(format!(
            "Parsing job {} did not finish after {} polls",
            job_id, self.max_polls
        )))
    }

    async fn fetch_result(&self, job_id: &str) -> Result<String, ParserError> {
        let body: Value = self
            .send(self.client.get(format!(
                "{}/api/parsing/job/{}/result/{}",
                self.base_url,
                job_id,
                self.result_type.as_str()
            )))
            .await?;

        result_text(&body, self.result_type.as_str())
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ParserError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ParserError::Conversion(format!("Parsing service request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ParserError::Conversion(format!(
                "Parsing service error {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ParserError::Conversion(format!("Invalid parsing service response: {}", e)))
    }
}

/// Text under `key`; a list of documents is joined with the separator
fn result_text(body: &Value, key: &str) -> Result<String, ParserError> {
    match body.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(docs)) if !docs.is_empty() => Ok(docs
            .iter()
            .filter_map(|doc| match doc {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(DOCUMENT_SEPARATOR)),
        // Blank text is passed on; the pipeline reports documents without content
        _ => Err(ParserError::Conversion(
            "Parsing service returned no documents.".to_string(),
        )),
    }
}

#[async_trait]
impl DocumentParser for HostedParser {
    fn name(&self) -> &'static str {
        "speed"
    }

    async fn parse(&self, path: &Path) -> Result<ParsedDocument, ParserError> {
        self.validate_input(path)?;

        let job_id = self.upload(path).await?;
        self.wait_for(&job_id).await?;
        let text = self.fetch_result(&job_id).await?;

        info!(job_id = %job_id, chars = text.len(), "Hosted parsing complete");

        Ok(ParsedDocument {
            text,
            format: self.result_type.format(),
            images: ImageMap::new(),
        })
    }
}
