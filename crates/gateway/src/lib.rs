//! Asynx API Gateway
//!
//! The HTTP surface of the service. Handles:
//! - Chat responses, complete or streamed as server-sent events
//! - PDF upload and chunk deletion
//! - Rate limiting, CORS and request ids
//! - Observability (logging, metrics, tracing)

pub mod handlers;
pub mod middleware;
pub mod telemetry;

use asynx_common::{
    config::{AppConfig, Tier},
    db::DbPool,
    RagPipeline,
};
use asynx_ingestion::{DeletionPipeline, IngestionPipeline};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub rag: Arc<RagPipeline>,
    pub ingestion: Arc<IngestionPipeline>,
    pub deletion: Arc<DeletionPipeline>,
    /// Checked by the readiness probe; absent when running without a database
    pub db: Option<DbPool>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        rag: RagPipeline,
        ingestion: IngestionPipeline,
        deletion: DeletionPipeline,
    ) -> Self {
        Self {
            config,
            rag: Arc::new(rag),
            ingestion: Arc::new(ingestion),
            deletion: Arc::new(deletion),
            db: None,
        }
    }

    pub fn with_db(mut self, db: DbPool) -> Self {
        self.db = Some(db);
        self
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Chat endpoints
        .route("/chat/response", post(handlers::chat::response))
        .route("/chat/stream", post(handlers::chat::stream))
        // Document endpoints
        .route("/rag/upload", post(handlers::rag::upload))
        .route("/rag/delete", delete(handlers::rag::delete));

    let prefix = config.server.api_prefix.trim_end_matches('/');
    let mut app = if prefix.is_empty() {
        Router::new().merge(api_routes)
    } else {
        Router::new().nest(prefix, api_routes)
    };

    app = app.layer(DefaultBodyLimit::max(config.server.max_upload_bytes));

    if config.rate_limit.enabled {
        let limit = middleware::rate_limit::RateLimit::new(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        app = app.layer(axum_middleware::from_fn_with_state(
            limit,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app; the request id is set outermost so every inner layer sees it
    app.layer(axum_middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config))
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// CORS from the configured origin list; any origin locally when the list is empty
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .all_cors_origins()
        .unwrap_or_default()
        .iter()
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() && config.environment == Tier::Local {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
