//! Route handler functions for all API endpoints.
//!
//! Each handler resolves the caller, delegates to the chat engine, and
//! returns JSON. Turns are the exception: they stream UI patches as SSE.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use quarry_chat::{ChatDetail, ChatError, ExampleMessages, TurnSummary, UiItem, UiPatch};
use quarry_core::types::ChatSummary;

use crate::auth::CallerId;
use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ExamplesRequest {
    #[serde(default)]
    pub schema: String,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ChatsResponse {
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Serialize)]
pub struct UiResponse {
    pub items: Vec<UiItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowUpsResponse {
    pub questions: Vec<String>,
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Chats
// =============================================================================

/// POST /chats - start a new chat.
pub async fn create_chat(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<(StatusCode, Json<CreateChatResponse>), ApiError> {
    let session = state.engine.create_chat(&user_id)?;
    let id = session.chat_id().to_string();
    Ok((
        StatusCode::CREATED,
        Json(CreateChatResponse {
            path: format!("/chat/{}", id),
            id,
        }),
    ))
}

/// GET /chats - the caller's chats, newest first.
pub async fn list_chats(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<ChatsResponse>, ApiError> {
    let chats = state.engine.list_chats(&user_id)?;
    Ok(Json(ChatsResponse { chats }))
}

/// GET /chats/{id} - a chat's log.
pub async fn get_chat(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatDetail>, ApiError> {
    Ok(Json(state.engine.chat_detail(&chat_id, &user_id)?))
}

/// GET /chats/{id}/ui - UI items derived from the log.
pub async fn get_ui(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(chat_id): Path<String>,
) -> Result<Json<UiResponse>, ApiError> {
    let items = state.engine.ui_state(&chat_id, &user_id)?;
    Ok(Json(UiResponse { items }))
}

/// POST /chats/{id}/credentials - connect the chat to its database.
///
/// Responds `{success, error?}`. Failures keep that shape and carry the
/// status of the underlying error (409 when credentials are already set).
pub async fn set_credentials(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(chat_id): Path<String>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    if body.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }

    match state
        .engine
        .set_database_creds(&chat_id, &user_id, body.url.trim(), &body.token)
        .await
    {
        Ok(()) => Ok(Json(CredentialsResponse {
            success: true,
            error: None,
        })
        .into_response()),
        Err(e @ ChatError::SessionNotFound(_)) => Err(e.into()),
        Err(e) => {
            tracing::warn!(chat_id = %chat_id, error = %e, "Credential set rejected");
            let message = e.to_string();
            let status = ApiError::from(e).status();
            Ok((
                status,
                Json(CredentialsResponse {
                    success: false,
                    error: Some(message),
                }),
            )
                .into_response())
        }
    }
}

// =============================================================================
// Turns
// =============================================================================

fn patch_event(patch: &UiPatch) -> Event {
    let data = serde_json::to_string(patch).unwrap_or_default();
    Event::default().event("patch").data(data)
}

fn done_event(summary: &TurnSummary) -> Event {
    let data = serde_json::to_string(summary).unwrap_or_default();
    Event::default().event("done").data(data)
}

fn error_event(err: &ApiError) -> Event {
    let data = serde_json::to_string(&err.body()).unwrap_or_default();
    Event::default().event("error").data(data)
}

/// POST /chats/{id}/messages - run a turn, streaming UI patches.
///
/// Validation and the turn gate are checked before the stream opens, so a
/// rejected message gets a plain JSON error. Once streaming, the turn runs
/// in its own task and finishes even if the client goes away; the stream
/// ends with a `done` or `error` event.
pub async fn post_message(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(chat_id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let turn = state.engine.begin_turn(&chat_id, &user_id, &body.content)?;

    let (patch_tx, patch_rx) = mpsc::unbounded_channel::<UiPatch>();
    let (done_tx, done_rx) = oneshot::channel::<Result<TurnSummary, ChatError>>();
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        let result = engine.run_turn(turn, Some(&patch_tx)).await;
        drop(patch_tx);
        let _ = done_tx.send(result);
    });

    let patches = UnboundedReceiverStream::new(patch_rx).map(|patch| Ok(patch_event(&patch)));
    let outcome = futures::stream::once(async move {
        let event = match done_rx.await {
            Ok(Ok(summary)) => done_event(&summary),
            Ok(Err(e)) => error_event(&ApiError::from(e)),
            Err(_) => error_event(&ApiError::Internal("turn task ended unexpectedly".to_string())),
        };
        Ok(event)
    });

    Ok(Sse::new(patches.chain(outcome)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

// =============================================================================
// Suggestions
// =============================================================================

/// GET /chats/{id}/follow-ups - questions the user might ask next.
pub async fn follow_ups(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(chat_id): Path<String>,
) -> Result<Json<FollowUpsResponse>, ApiError> {
    let questions = state.engine.follow_up_questions(&chat_id, &user_id).await?;
    Ok(Json(FollowUpsResponse { questions }))
}

/// POST /examples - example opening messages for a schema.
pub async fn examples(
    State(state): State<AppState>,
    CallerId(_user_id): CallerId,
    Json(body): Json<ExamplesRequest>,
) -> Result<Json<ExampleMessages>, ApiError> {
    Ok(Json(state.engine.example_messages(&body.schema).await?))
}
