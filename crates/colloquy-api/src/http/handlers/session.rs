//! Session HTTP handlers.
//!
//! Endpoints:
//! - POST   /api/v1/sessions                 - Create a session
//! - GET    /api/v1/sessions                 - List the caller's sessions
//! - GET    /api/v1/sessions/{id}            - Get a session with live partial content
//! - PATCH  /api/v1/sessions/{id}            - Rename a session
//! - DELETE /api/v1/sessions/{id}            - Delete a session (cancels its streams)
//! - POST   /api/v1/sessions/{id}/duplicate  - Copy a session under fresh ids
//! - GET    /api/v1/sessions/{id}/activity   - Idle / streaming / errored

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use colloquy_core::chat::service::SessionActivity;
use colloquy_types::chat::ChatSession;

use crate::http::error::AppError;
use crate::http::extractors::owner::Owner;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for session creation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Model for the session; the configured default when absent.
    pub model: Option<String>,
}

/// Request body for renaming.
#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

/// Session row for list views (no message bodies).
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub model: String,
    pub message_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&ChatSession> for SessionSummary {
    fn from(s: &ChatSession) -> Self {
        Self {
            id: s.id,
            title: s.title.clone(),
            model: s.model.clone(),
            message_count: s.messages.len(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

fn session_link(id: &Uuid) -> String {
    format!("/api/v1/sessions/{id}")
}

/// POST /api/v1/sessions - Create a session.
pub async fn create_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<ApiResponse<ChatSession>, AppError> {
    let start = Instant::now();
    let Json(body) = body.unwrap_or_default();

    let session = state
        .chat_service
        .create_session(&owner, body.model.as_deref())
        .await?;
    let link = session_link(&session.id);
    Ok(ApiResponse::created(session, start).with_link("self", &link))
}

/// GET /api/v1/sessions - List the caller's sessions, most recent first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<ApiResponse<Vec<SessionSummary>>, AppError> {
    let start = Instant::now();
    let sessions = state.chat_service.list_sessions(&owner).await?;
    let summaries = sessions.iter().map(SessionSummary::from).collect();
    Ok(ApiResponse::success(summaries, start).with_link("self", "/api/v1/sessions"))
}

/// GET /api/v1/sessions/{id} - Get a session, overlaid with live partial content.
pub async fn get_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<ChatSession>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let session = state.chat_service.get_session(&sid, &owner).await?;
    Ok(ApiResponse::success(session, start).with_link("self", &session_link(&sid)))
}

/// PATCH /api/v1/sessions/{id} - Rename a session.
pub async fn rename_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
    Json(body): Json<RenameSessionRequest>,
) -> Result<ApiResponse<SessionSummary>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let session = state
        .chat_service
        .rename_session(&sid, &owner, &body.title)
        .await?;
    Ok(ApiResponse::success(SessionSummary::from(&session), start))
}

/// DELETE /api/v1/sessions/{id} - Delete a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    state.chat_service.delete_session(&sid, &owner).await?;
    Ok(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": sid }),
        start,
    ))
}

/// POST /api/v1/sessions/{id}/duplicate - Copy a session under fresh ids.
pub async fn duplicate_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<ChatSession>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let copy = state.chat_service.duplicate_session(&sid, &owner).await?;
    let link = session_link(&copy.id);
    Ok(ApiResponse::created(copy, start).with_link("self", &link))
}

/// GET /api/v1/sessions/{id}/activity - What the session is doing.
pub async fn session_activity(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<SessionActivity>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let activity = state.chat_service.activity(&sid, &owner).await?;
    Ok(ApiResponse::success(activity, start))
}

