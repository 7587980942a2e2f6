use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::ApiError;
use super::AppState;
use crate::manager::SpawnRequest;
use crate::session::{SessionId, SessionInfo};

pub(super) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub(super) struct SpawnBody {
    project_id: String,
    cwd: PathBuf,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    name: Option<String>,
}

pub(super) async fn session_spawn(
    State(state): State<AppState>,
    Json(body): Json<SpawnBody>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let mut request = SpawnRequest::new(body.project_id, body.cwd, body.command, body.args);
    if let Some(name) = body.name {
        request = request.with_name(name);
    }
    let manager = state.manager.clone();
    let id = tokio::task::spawn_blocking(move || manager.spawn(request))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .map_err(|e| ApiError::from_session("", e))?;

    let info = state
        .manager
        .info(&id)
        .map_err(|e| ApiError::from_session(id.as_str(), e))?;
    Ok((StatusCode::CREATED, Json(info)))
}

#[derive(Deserialize)]
pub(super) struct ShellBody {
    session_id: String,
    cwd: PathBuf,
}

#[derive(Serialize)]
pub(super) struct ShellResponse {
    session_id: SessionId,
}

pub(super) async fn session_spawn_shell(
    State(state): State<AppState>,
    Json(body): Json<ShellBody>,
) -> Result<Json<ShellResponse>, ApiError> {
    if body.session_id.is_empty() {
        return Err(ApiError::InvalidRequest("session_id must not be empty".into()));
    }
    let manager = state.manager.clone();
    let id = SessionId::from(body.session_id);
    let session_id = tokio::task::spawn_blocking(move || manager.spawn_shell(id, body.cwd))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .map_err(|e| ApiError::from_session("", e))?;
    Ok(Json(ShellResponse { session_id }))
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    project_id: Option<String>,
}

pub(super) async fn session_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<SessionInfo>> {
    Json(state.manager.list(query.project_id.as_deref()))
}

#[derive(Serialize)]
pub(super) struct SessionStatusResponse {
    #[serde(flatten)]
    info: SessionInfo,
    /// Base64 of everything the session has printed so far.
    scrollback: String,
}

pub(super) async fn session_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let (info, scrollback) = state
        .manager
        .detail(&SessionId::from(id.as_str()))
        .map_err(|e| ApiError::from_session(&id, e))?;
    Ok(Json(SessionStatusResponse {
        info,
        scrollback: base64::engine::general_purpose::STANDARD.encode(&scrollback),
    }))
}

pub(super) async fn session_scrollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scrollback = state
        .manager
        .scrollback(&SessionId::from(id.as_str()))
        .map_err(|e| ApiError::from_session(&id, e))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], scrollback))
}

pub(super) async fn session_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let manager = state.manager.clone();
    let session_id = SessionId::from(id.as_str());
    tokio::task::spawn_blocking(move || manager.write(&session_id, &body))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .map_err(|e| ApiError::from_session(&id, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct ResizeBody {
    cols: u16,
    rows: u16,
}

pub(super) async fn session_resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Result<StatusCode, ApiError> {
    if body.cols == 0 || body.rows == 0 {
        return Err(ApiError::InvalidRequest(
            "cols and rows must be non-zero".into(),
        ));
    }
    state
        .manager
        .resize(&SessionId::from(id.as_str()), body.cols, body.rows)
        .map_err(|e| ApiError::from_session(&id, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct RenameBody {
    name: String,
}

pub(super) async fn session_rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<StatusCode, ApiError> {
    state
        .manager
        .rename(&SessionId::from(id.as_str()), body.name)
        .map_err(|e| ApiError::from_session(&id, e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn session_kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.manager.kill(&SessionId::from(id));
    StatusCode::NO_CONTENT
}
