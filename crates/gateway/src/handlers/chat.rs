//! Chat handlers

use super::json_rejection;
use crate::AppState;
use asynx_common::chat::{ChatRequest, ChatResponse};
use asynx_common::errors::Result;
use asynx_common::metrics;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;

/// Complete response in one body
pub async fn response(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(request) = payload.map_err(json_rejection)?;

    let outcome = state.rag.respond(request).await;
    metrics::record_chat_request("response", outcome.is_ok());

    Ok(Json(outcome?))
}

/// Server-sent events, one `data:` frame per stream event
///
/// Failures before the first event are ordinary error responses; later ones
/// arrive in-band as an `{"error": ..}` event.
pub async fn stream(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let Json(request) = payload.map_err(json_rejection)?;

    let opened = state.rag.stream(request).await;
    metrics::record_chat_request("stream", opened.is_ok());

    let events = opened?.map(|event| Ok(Event::default().data(event.payload())));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
