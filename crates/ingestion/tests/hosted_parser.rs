//! Hosted parser against a local stand-in for the parsing service

use asynx_common::config::IngestionConfig;
use asynx_ingestion::parsers::{DocumentParser, HostedParser, OutputFormat};
use asynx_ingestion::ParserError;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const API_KEY: &str = "llx-test";

/// Serve the upload / status / result endpoints; job status walks `statuses`
async fn spawn_service(statuses: Vec<&'static str>, result: Value) -> String {
    let polls = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route(
            "/api/parsing/upload",
            post(|headers: HeaderMap, body: Bytes| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer llx-test");
                if !authorized || body.is_empty() {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(json!({"id": "job-1", "status": "PENDING"})))
            }),
        )
        .route(
            "/api/parsing/job/{id}",
            get(move |Path(id): Path<String>| {
                let polls = polls.clone();
                let statuses = statuses.clone();
                async move {
                    let n = polls.fetch_add(1, Ordering::SeqCst);
                    let status = statuses[n.min(statuses.len() - 1)];
                    Json(json!({"id": id, "status": status}))
                }
            }),
        )
        .route(
            "/api/parsing/job/{id}/result/{kind}",
            get(move |Path((_id, kind)): Path<(String, String)>| {
                let result = result.clone();
                async move {
                    if kind == "markdown" {
                        Ok(Json(result))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn parser(base_url: String, max_polls: u32) -> HostedParser {
    HostedParser::new(&IngestionConfig {
        parser_strategy: "speed".to_string(),
        llama_cloud_api_key: Some(API_KEY.to_string()),
        llama_cloud_base_url: base_url,
        poll_interval_ms: 1,
        max_polls,
        ..IngestionConfig::default()
    })
    .unwrap()
}

fn pdf_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    file.write_all(b"%PDF-1.5 body").unwrap();
    file
}

#[tokio::test]
async fn test_polls_until_success_then_fetches_markdown() {
    let base = spawn_service(
        vec!["PENDING", "PENDING", "SUCCESS"],
        json!({"markdown": "# Title\n\nBody text"}),
    )
    .await;
    let file = pdf_file();

    let parsed = parser(base, 10).parse(file.path()).await.unwrap();

    assert_eq!(parsed.text, "# Title\n\nBody text");
    assert_eq!(parsed.format, OutputFormat::Markdown);
    assert!(parsed.images.is_empty());
}

#[tokio::test]
async fn test_failed_job_is_conversion_error() {
    let base = spawn_service(vec!["PENDING", "ERROR"], json!({})).await;
    let file = pdf_file();

    let err = parser(base, 10).parse(file.path()).await.unwrap_err();
    assert!(matches!(err, ParserError::Conversion(_)));
}

#[tokio::test]
async fn test_job_that_never_finishes_times_out() {
    let base = spawn_service(vec!["PENDING"], json!({})).await;
    let file = pdf_file();

    let err = parser(base, 3).parse(file.path()).await.unwrap_err();
    assert!(err.to_string().contains("did not finish after 3 polls"));
}

#[tokio::test]
async fn test_missing_result_is_conversion_error() {
    let base = spawn_service(vec!["SUCCESS"], json!({"markdown": []})).await;
    let file = pdf_file();

    let err = parser(base, 10).parse(file.path()).await.unwrap_err();
    assert!(matches!(err, ParserError::Conversion(_)));
}

#[tokio::test]
async fn test_blank_result_passed_through() {
    let base = spawn_service(vec!["SUCCESS"], json!({"markdown": ""})).await;
    let file = pdf_file();

    let parsed = parser(base, 10).parse(file.path()).await.unwrap();
    assert!(parsed.text.is_empty());
}

#[tokio::test]
async fn test_input_validated_before_upload() {
    let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();

    let err = parser("http://127.0.0.1:9".to_string(), 1)
        .parse(file.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ParserError::InvalidDocument(_)));
}
