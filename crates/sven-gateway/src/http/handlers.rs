// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Route handlers. One function per endpoint; each talks to [`AppState`],
//! [`sven_memory::Store`], or a session's [`sven_core::AgentService`] and
//! folds the result into JSON or an SSE stream.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use sven_core::{AgentEvent, ErrorKind};
use sven_memory::StoreError;

use crate::http::sse::to_sse_event;
use crate::state::AppState;

/// Uniform `{"error": "..."}` body, status code derived from [`ErrorKind`].
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let kind = ErrorKind::from(&e);
        Self::new(kind, e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorKind::Internal, e.to_string())
    }
}

impl From<sven_config::PreferencesError> for ApiError {
    fn from(e: sven_config::PreferencesError) -> Self {
        Self::new(ErrorKind::Internal, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    project_path: String,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<Json<Value>> {
    if body.project_path.trim().is_empty() {
        return Err(ApiError::invalid_input("project_path must not be empty"));
    }
    let (_service, row) = state.create_session(&body.project_path).await?;
    Ok(Json(json!({ "id": row.id })))
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<sven_memory::types::Session>>> {
    let sessions = state.store.list_sessions(q.project, q.limit.unwrap_or(50)).await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<sven_memory::types::Session>> {
    let row = state.store.find_session_by_prefix(&id).await?;
    Ok(Json(row))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.delete_session(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<sven_memory::types::TranscriptMessage>>> {
    let row = state.store.find_session_by_prefix(&id).await?;
    let messages = state.store.get_messages(&row.id).await?;
    Ok(Json(messages))
}

// ── Submit (SSE) ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitRequest {
    text: String,
}

/// `POST /api/sessions/{id}/submit`: run one turn, streaming every
/// [`AgentEvent`] back as an SSE frame as it is produced.
///
/// `AgentService::submit`'s `on_event` callback is synchronous, called from
/// inside the turn's own async loop; bridging it onto the HTTP response
/// means moving it off that task entirely. An unbounded `mpsc` channel does
/// that: the callback becomes a non-blocking `send`, and a second task
/// drains the receiver into the SSE stream. The turn runs to completion on
/// its own task regardless of whether the client is still reading.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if body.text.trim().is_empty() {
        return Err(ApiError::invalid_input("text must not be empty"));
    }
    let row = state.store.find_session_by_prefix(&id).await?;
    let service = state.get_session(&row.id).await?;
    let cwd = PathBuf::from(row.project_path.clone());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<AgentEvent>();
    tokio::spawn(async move {
        let send = |event: AgentEvent| {
            let _ = tx.send(event);
        };
        if let Err(e) = service.submit(&body.text, &cwd, send).await {
            tracing::warn!(error = %e, session_id = %row.id, "turn ended in error");
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|ev| Ok(to_sse_event(&ev)));
    Ok(Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default()))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let service = state.get_session(&id).await?;
    service.cancel().await;
    Ok(Json(json!({ "status": "cancelling" })))
}

#[derive(Deserialize)]
pub struct AskResponseRequest {
    ask_id: String,
    text: String,
}

pub async fn ask_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AskResponseRequest>,
) -> ApiResult<Json<Value>> {
    let service = state.get_session(&id).await?;
    let delivered = service.ask_gateway().answer(&body.ask_id, body.text).await;
    if !delivered {
        return Err(ApiError::not_found(format!("no pending ask with id {}", body.ask_id)));
    }
    Ok(Json(json!({ "status": "delivered" })))
}

#[derive(Deserialize)]
pub struct SetModelRequest {
    provider: String,
    name: String,
    api_key_env: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
}

pub async fn set_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetModelRequest>,
) -> ApiResult<Json<Value>> {
    let row = state.store.find_session_by_prefix(&id).await?;
    let service = state.get_session(&row.id).await?;

    let cfg = sven_config::ModelConfig {
        provider: body.provider,
        name: body.name,
        api_key_env: body.api_key_env,
        api_key: body.api_key,
        base_url: body.base_url,
        max_tokens: body.max_tokens,
        ..Default::default()
    };
    let provider = sven_model::from_config(&cfg)?;
    let model_id = provider.model_name().to_string();
    service.set_model(Arc::from(provider)).await;
    state.store.update_session_model(&row.id, &model_id, &model_id).await?;
    Ok(Json(json!({ "status": "ok", "model_id": model_id })))
}

#[derive(Deserialize)]
pub struct SetTitleRequest {
    title: String,
}

pub async fn set_title(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetTitleRequest>,
) -> ApiResult<Json<Value>> {
    let service = state.get_session(&id).await?;
    service.rename_session(&body.title).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct SetTagsRequest {
    tags: Vec<String>,
}

pub async fn set_tags(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetTagsRequest>,
) -> ApiResult<Json<Value>> {
    let service = state.get_session(&id).await?;
    service.set_tags(&body.tags).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct BranchRequest {
    at_sequence: i64,
}

pub async fn branch_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<BranchRequest>,
) -> ApiResult<Json<sven_memory::types::Session>> {
    let row = state.store.find_session_by_prefix(&id).await?;
    let branched = state.store.branch_session(&row.id, body.at_sequence).await?;
    Ok(Json(branched))
}

// ── Config / preferences ──────────────────────────────────────────────────────

pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let prefs = sven_config::Preferences::load(&state.preferences_path)?;
    Ok(Json(json!({ "values": prefs.get_all() })))
}

#[derive(Deserialize)]
pub struct SetConfigRequest {
    key: String,
    value: String,
}

pub async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetConfigRequest>,
) -> ApiResult<Json<Value>> {
    let path = state.preferences_path.clone();
    let mut prefs = sven_config::Preferences::load(&path)?;
    prefs
        .set(&body.key, &body.value)
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;
    prefs.save(&path)?;
    Ok(Json(json!({ "status": "ok" })))
}

// ── MCP ───────────────────────────────────────────────────────────────────────

/// No MCP client surface ships in this daemon; the endpoint stays for
/// clients that probe it and always reports an empty tool set.
pub async fn mcp_tools() -> Json<Value> {
    Json(json!({ "tools": [] }))
}
