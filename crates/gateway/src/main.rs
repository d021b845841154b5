//! Asynx API Gateway binary
//!
//! Wires configuration, telemetry and the hosted collaborators into the
//! router and serves it until Ctrl+C or SIGTERM.

use anyhow::Context;
use asynx_common::{
    config::AppConfig,
    db::DbPool,
    embeddings::shared_embedder,
    llm::openai::OpenAIChatModel,
    metrics,
    vectorstore::pgvector::PgVectorStore,
    RagPipeline,
};
use asynx_gateway::{create_router, telemetry, AppState};
use asynx_ingestion::{parser_from_config, DeletionPipeline, IngestionPipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    let telemetry = telemetry::init_tracing(&config)?;
    info!(
        "Starting {} v{} ({})",
        config.project_name,
        asynx_common::VERSION,
        config.environment.as_str()
    );

    config.validate()?;
    let config = Arc::new(config);

    // Initialize metrics
    telemetry::init_metrics(&config)?;
    metrics::register_metrics();

    // Initialize database connection and storage schema
    let db = DbPool::new(&config.database).await?;

    let api_key = config.llm.api_key.clone().unwrap_or_default();
    let embedding_key = config.embedding_api_key().unwrap_or(&api_key).to_string();
    let embedder = shared_embedder(&embedding_key, &config.embedding).await?;

    let store = PgVectorStore::new(db.clone(), embedder);
    store.migrate().await?;
    let store = Arc::new(store);

    let model = Arc::new(OpenAIChatModel::new(api_key, &config.llm)?);

    // Unknown strategy or missing credential stops startup here
    let parser = parser_from_config(&config.ingestion)?;

    let rag = RagPipeline::new(store.clone(), model)
        .with_default_model(config.llm.default_model.clone());
    let mut ingestion = IngestionPipeline::new(store.clone(), parser);
    if let Some(dir) = config.ingestion.upload_dir.as_deref() {
        ingestion = ingestion.with_upload_dir(dir);
    }
    let deletion = DeletionPipeline::new(store).strict(config.rag.strict_delete);

    let state = AppState::new(config.clone(), rag, ingestion, deletion).with_db(db);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}{}", addr, config.server.api_prefix);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signalled_tx.send(());
    });
    let mut server = tokio::spawn(async move { server.await });

    let drain_deadline = async {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(config.shutdown_timeout()).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = &mut server => result??,
        _ = drain_deadline => {
            warn!(timeout_secs = config.server.shutdown_timeout_secs, "Shutdown timed out, dropping open connections");
            server.abort();
        }
    }

    info!("Server shutdown complete");
    telemetry.shutdown();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
