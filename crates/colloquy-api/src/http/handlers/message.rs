//! Message HTTP handlers: generation, cancellation and variant navigation.
//!
//! Streaming endpoints answer with Server-Sent Events:
//! - `stream`: first event, the `{session_id, message_id, variant_id}` target
//! - `snapshot`: accumulated content so far
//! - `completed` / `failed` / `cancelled`: terminal event with final content
//!
//! Closing the connection withdraws interest: the stream is cancelled and
//! whatever arrived so far is kept.
//!
//! Endpoints:
//! - POST /api/v1/sessions/{id}/messages                     - Send (SSE)
//! - POST /api/v1/sessions/{id}/messages/{mid}/retry         - Regenerate (SSE)
//! - POST /api/v1/sessions/{id}/messages/{mid}/edit          - Edit and resend (SSE)
//! - POST /api/v1/sessions/{id}/messages/{mid}/cancel        - Cancel running streams
//! - POST /api/v1/sessions/{id}/messages/{mid}/navigate      - Step the visible variant
//! - GET  /api/v1/sessions/{id}/messages/{mid}/position      - "k of n"
//! - PUT  /api/v1/sessions/{id}/messages/{mid}/content-flags - Attach moderation flags

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use colloquy_core::chat::ingestor::ResponseStream;
use colloquy_core::chat::versions::{Direction, VariantPosition};
use colloquy_observe::attrs;
use colloquy_types::chat::ChatMessage;
use colloquy_types::error::ChatError;
use colloquy_types::moderation::ContentFlags;
use colloquy_types::stream::StreamUpdate;

use crate::http::error::AppError;
use crate::http::extractors::owner::Owner;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body carrying user text.
#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Optional body for retry.
#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    /// Replaces the preceding user prompt for this generation only.
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub direction: Direction,
}

/// A message together with its variant position.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub message: ChatMessage,
    pub position: VariantPosition,
}

/// Render one stream update as an SSE event named after its kind.
fn update_event(update: &StreamUpdate) -> Event {
    Event::default()
        .event(update.kind())
        .json_data(update)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Relay a response stream as SSE.
fn sse_response(stream: ResponseStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let target = stream.target();
    let events = async_stream::stream! {
        let first = Event::default()
            .event("stream")
            .json_data(target)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        yield Ok::<_, Infallible>(first);

        let mut stream = stream;
        while let Some(update) = stream.next().await {
            yield Ok(update_event(&update));
        }
        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            "sse relay finished"
        );
    };

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// POST /api/v1/sessions/{id}/messages: send user text and stream the answer.
pub async fn send_message(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
    Json(body): Json<TextRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sid = parse_uuid(&session_id)?;
    let span = tracing::info_span!(attrs::SPAN_SEND_MESSAGE, session_id = %sid, owner_id = %owner);
    let stream = state
        .chat_service
        .send_message(&sid, &owner, &body.text)
        .instrument(span)
        .await?;
    Ok(sse_response(stream))
}

/// POST /api/v1/sessions/{id}/messages/{mid}/retry: regenerate a response.
pub async fn retry(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    body: Option<Json<RetryRequest>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    let Json(body) = body.unwrap_or_default();
    let span = tracing::info_span!(attrs::SPAN_RETRY, session_id = %sid, message_id = %mid);
    let stream = state
        .chat_service
        .retry(&sid, &owner, &mid, body.prompt)
        .instrument(span)
        .await?;
    Ok(sse_response(stream))
}

/// POST /api/v1/sessions/{id}/messages/{mid}/edit: resend an edited prompt.
pub async fn edit_and_resend(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<TextRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    let span = tracing::info_span!(attrs::SPAN_EDIT_AND_RESEND, session_id = %sid, message_id = %mid);
    let stream = state
        .chat_service
        .edit_and_resend(&sid, &owner, &mid, &body.text)
        .instrument(span)
        .await?;
    Ok(sse_response(stream))
}

/// POST /api/v1/sessions/{id}/messages/{mid}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    let cancelled = state.chat_service.cancel(&sid, &owner, &mid).await?;
    Ok(ApiResponse::success(
        serde_json::json!({ "cancelled": cancelled }),
        start,
    ))
}

/// POST /api/v1/sessions/{id}/messages/{mid}/navigate
pub async fn navigate(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<NavigateRequest>,
) -> Result<ApiResponse<MessageView>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    let message = state
        .chat_service
        .navigate(&sid, &owner, &mid, body.direction)
        .await?;
    let position = colloquy_core::chat::versions::position(&message);
    Ok(ApiResponse::success(MessageView { message, position }, start))
}

/// GET /api/v1/sessions/{id}/messages/{mid}/position
pub async fn position(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<ApiResponse<VariantPosition>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    let position = state.chat_service.position(&sid, &owner, &mid).await?;
    Ok(ApiResponse::success(position, start))
}

/// PUT /api/v1/sessions/{id}/messages/{mid}/content-flags
pub async fn attach_content_flags(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(flags): Json<ContentFlags>,
) -> Result<ApiResponse<ChatMessage>, AppError> {
    let start = Instant::now();
    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;

    // Ownership check; the service call itself is owner-agnostic.
    state.chat_service.get_session(&sid, &owner).await?;
    let session = state
        .chat_service
        .attach_content_flags(&sid, &mid, flags)
        .await?;
    let message = session
        .message(&mid)
        .cloned()
        .ok_or(ChatError::NotFound("message"))?;
    Ok(ApiResponse::success(message, start))
}

