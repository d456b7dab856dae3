//! Chat CRUD HTTP handlers.
//!
//! Endpoints:
//! - GET  /v1/chats      - List chats, newest first, without messages
//! - GET  /v1/chats/{id} - Get a chat with its transcript
//! - POST /v1/chats      - Create an empty chat

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use parley_core::chat::projection::ChatResponse;
use parley_types::error::ChatError;

use crate::http::error::AppError;
use crate::state::AppState;

/// Parse a chat id from a path parameter.
///
/// A malformed id cannot name an existing chat, so it is reported as not found.
pub fn parse_chat_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse::<Uuid>()
        .map_err(|_| AppError::Chat(ChatError::NotFound))
}

/// GET /v1/chats
pub async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<ChatResponse>>, AppError> {
    let chats = state.chat_service.list_chats().await?;
    Ok(Json(chats.iter().map(ChatResponse::from).collect()))
}

/// GET /v1/chats/{id}
pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    let chat_id = parse_chat_id(&id)?;
    let chat = state.chat_service.get_chat(&chat_id).await?;
    Ok(Json(ChatResponse::from(&chat)))
}

/// POST /v1/chats
pub async fn create_chat(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    let chat = state.chat_service.create_chat().await?;
    Ok((StatusCode::CREATED, Json(ChatResponse::from(&chat))))
}
