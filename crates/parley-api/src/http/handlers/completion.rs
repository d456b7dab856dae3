//! SSE streaming completion endpoint.
//!
//! POST /v1/chats/{id}/completion
//!
//! Everything that can fail before the first fragment (unknown chat, bad
//! body, store write, provider refusal) is returned as a JSON error with a
//! status code. Once the stream is open, fragments arrive as unnamed SSE
//! events and a mid-stream failure arrives as a terminal `error` event.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::http::error::AppError;
use crate::http::extractors::valid_json::ValidJson;
use crate::http::handlers::chat::parse_chat_id;
use crate::http::sse::SseResponder;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Request body for the completion endpoint.
#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    #[serde(rename = "userMessage")]
    pub user_message: String,
}

/// POST /v1/chats/{id}/completion
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<CompletionBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let chat_id = parse_chat_id(&id)?;
    let turn = state.orchestrator.begin(&chat_id, body.user_message).await?;

    let (tx, rx) = mpsc::channel(state.config.completion.channel_capacity.max(1));

    tokio::spawn(
        async move {
            let outcome = turn.relay(SseResponder::new(tx)).await;
            if outcome.persist_error.is_some() {
                tracing::warn!(fragments = outcome.fragments, "Delivered completion was not stored");
            }
        }
        .instrument(tracing::Span::current()),
    );

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
