//! Configuration management for Asynx services
//!
//! Supports loading configuration from:
//! - Configuration files (config/default, config/{ENVIRONMENT}, config/local)
//! - Environment variables prefixed with APP__ (e.g. APP__SERVER__PORT=8081)
//! - The flat deployment variables (OPENAI_API_KEY, POSTGRES_URI, ...)
//! - Default values

use crate::errors::{AppError, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deployment tier the service runs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Local,
    Staging,
    Production,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Staging => "staging",
            Tier::Production => "production",
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Deployment tier (local, staging, production)
    #[serde(default)]
    pub environment: Tier,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Hosted chat model
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Document parsing and chunking
    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix every API route is nested under
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string (POSTGRES_URI)
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API key for the generation service (OPENAI_API_KEY)
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base")]
    pub api_base: String,

    /// Model used when a request does not name one
    #[serde(default = "default_chat_model")]
    pub default_model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Falls back to the LLM key when unset
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base")]
    pub api_base: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Parser strategy key: quality or speed
    #[serde(default = "default_parser_strategy")]
    pub parser_strategy: String,

    /// Credential for the hosted parser (LLAMA_CLOUD_API_KEY)
    pub llama_cloud_api_key: Option<String>,

    #[serde(default = "default_llama_cloud_base")]
    pub llama_cloud_base_url: String,

    /// Hosted parser result type: markdown or text
    #[serde(default = "default_result_type")]
    pub result_type: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Directory for transient upload files (system temp dir when unset)
    pub upload_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RagConfig {
    /// Treat an unsuccessful delete result as a failure
    #[serde(default)]
    pub strict_delete: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_frontend_host")]
    pub frontend_host: String,

    /// Comma-separated list or JSON array (BACKEND_CORS_ORIGINS)
    pub backend_cors_origins: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Force JSON logging; defaults to on outside the local tier
    pub json_logging: Option<bool>,

    /// OTLP gRPC endpoint for span export
    pub otel_endpoint: Option<String>,

    /// Error-tracking DSN (SENTRY_DSN); never used as a trace endpoint
    pub sentry_dsn: Option<String>,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_project_name() -> String { "Asynx Intelligence API".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_api_prefix() -> String { "/api/v1".to_string() }
fn default_max_upload_bytes() -> usize { 50 * 1024 * 1024 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_openai_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_chat_model() -> String { crate::DEFAULT_CHAT_MODEL.to_string() }
fn default_llm_timeout() -> u64 { 120 }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 100 }
fn default_parser_strategy() -> String { "quality".to_string() }
fn default_llama_cloud_base() -> String { "https://api.cloud.llamaindex.ai".to_string() }
fn default_result_type() -> String { "markdown".to_string() }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_max_polls() -> u32 { 300 }
fn default_frontend_host() -> String { "http://localhost:5173".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "asynx".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
            max_upload_bytes: default_max_upload_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_openai_base(),
            default_model: default_chat_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_openai_base(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            parser_strategy: default_parser_strategy(),
            llama_cloud_api_key: None,
            llama_cloud_base_url: default_llama_cloud_base(),
            result_type: default_result_type(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            upload_dir: None,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            frontend_host: default_frontend_host(),
            backend_cors_origins: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: None,
            otel_endpoint: None,
            sentry_dsn: None,
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            environment: Tier::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingestion: IngestionConfig::default(),
            rag: RagConfig::default(),
            cors: CorsConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Flat deployment variables and the config keys they override
const FLAT_OVERRIDES: &[(&str, &str)] = &[
    ("ENVIRONMENT", "environment"),
    ("POSTGRES_URI", "database.url"),
    ("OPENAI_API_KEY", "llm.api_key"),
    ("LLAMA_CLOUD_API_KEY", "ingestion.llama_cloud_api_key"),
    ("FRONTEND_HOST", "cors.frontend_host"),
    ("BACKEND_CORS_ORIGINS", "cors.backend_cors_origins"),
    ("SENTRY_DSN", "observability.sentry_dsn"),
];

impl AppConfig {
    /// Load configuration from files and the environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let tier = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", tier)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        with_flat_overrides(builder, |name| std::env::var(name).ok())?
            .build()?
            .try_deserialize()
    }

    /// Load from a specific file, still honouring environment overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        with_flat_overrides(builder, |name| std::env::var(name).ok())?
            .build()?
            .try_deserialize()
    }

    /// Fail fast on settings the service cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(AppError::Configuration {
                message: "OPENAI_API_KEY is not set".to_string(),
            });
        }
        if self.database.url.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "POSTGRES_URI is not set".to_string(),
            });
        }
        self.all_cors_origins()?;
        Ok(())
    }

    /// Backend origins plus the frontend host, trailing slashes stripped
    pub fn all_cors_origins(&self) -> Result<Vec<String>> {
        let mut origins = match self.cors.backend_cors_origins.as_deref() {
            Some(raw) => parse_cors(raw)?,
            None => Vec::new(),
        };
        for origin in origins.iter_mut() {
            *origin = origin.trim_end_matches('/').to_string();
        }
        origins.push(self.cors.frontend_host.clone());
        Ok(origins)
    }

    /// Key used for embeddings, falling back to the LLM key
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
    }

    /// Whether log output should be JSON
    pub fn json_logging(&self) -> bool {
        self.observability
            .json_logging
            .unwrap_or(self.environment != Tier::Local)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

fn with_flat_overrides<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (var, key) in FLAT_OVERRIDES {
        let value = lookup(var).filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value)?;
    }
    Ok(builder)
}

/// Parse an origin list given either as "a, b" or as a JSON array
pub fn parse_cors(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(raw).map_err(|e| AppError::Configuration {
            message: format!("BACKEND_CORS_ORIGINS is not a valid JSON array: {}", e),
        });
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.api_prefix, "/api/v1");
        assert_eq!(config.llm.default_model, "gpt-5-mini");
        assert_eq!(config.ingestion.parser_strategy, "quality");
        assert!(!config.rag.strict_delete);
    }

    #[test]
    fn test_parse_cors_comma_separated() {
        let origins = parse_cors("http://a.com, http://b.com/ ,,").unwrap();
        assert_eq!(origins, vec!["http://a.com", "http://b.com/"]);
    }

    #[test]
    fn test_parse_cors_json_array() {
        let origins = parse_cors(r#"["http://a.com","http://b.com"]"#).unwrap();
        assert_eq!(origins.len(), 2);
        assert!(parse_cors("[not json").is_err());
    }

    #[test]
    fn test_all_cors_origins_appends_frontend() {
        let mut config = AppConfig::default();
        config.cors.backend_cors_origins = Some("http://api.example.com/".to_string());
        let origins = config.all_cors_origins().unwrap();
        assert_eq!(origins, vec!["http://api.example.com", "http://localhost:5173"]);
    }

    #[test]
    fn test_validate_requires_api_key_and_database() {
        let mut config = AppConfig::default();
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));

        config.llm.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_err());

        config.database.url = "postgres://localhost/asynx".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flat_overrides_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-flat"),
            ("POSTGRES_URI", "postgres://db/asynx"),
            ("ENVIRONMENT", "staging"),
            ("LLAMA_CLOUD_API_KEY", ""),
        ]);
        let builder = with_flat_overrides(Config::builder(), |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();
        let config: AppConfig = builder.build().unwrap().try_deserialize().unwrap();

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-flat"));
        assert_eq!(config.database.url, "postgres://db/asynx");
        assert_eq!(config.environment, Tier::Staging);
        assert!(config.ingestion.llama_cloud_api_key.is_none());
        assert!(config.json_logging());
        assert_eq!(config.embedding_api_key(), Some("sk-flat"));
    }

    #[test]
    fn test_sentry_dsn_kept_apart_from_trace_export() {
        let dsn = "https://key@o0.ingest.sentry.io/42";
        let vars: HashMap<&str, &str> = HashMap::from([("SENTRY_DSN", dsn)]);
        let builder = with_flat_overrides(Config::builder(), |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();
        let config: AppConfig = builder.build().unwrap().try_deserialize().unwrap();

        assert_eq!(config.observability.sentry_dsn.as_deref(), Some(dsn));
        assert!(config.observability.otel_endpoint.is_none());
    }
}
