//! SSE implementation of [`StreamResponder`].
//!
//! Fragments are pushed into a bounded channel whose receiver is the body of
//! an axum [`Sse`](axum::response::sse::Sse) response. When the client goes
//! away axum drops the body, the receiver closes, and the next `send` fails.

use axum::response::sse::Event;
use tokio::sync::mpsc;

use parley_core::chat::responder::{ResponderClosed, StreamResponder};

/// Writes completion fragments as SSE events.
///
/// Each fragment is one unnamed event; failures are a terminal `error` event
/// carrying `{"message": "..."}`. Dropping the responder ends the stream.
pub struct SseResponder {
    tx: mpsc::Sender<Event>,
    closed: bool,
}

impl SseResponder {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx, closed: false }
    }
}

/// SSE frames are line-based and cannot carry a bare carriage return.
///
/// The orchestrator already folds line endings before delivery, so this is a
/// no-op for relayed fragments and only guards direct callers.
fn normalize_newlines(fragment: &str) -> String {
    fragment.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn fragment_event(fragment: &str) -> Event {
    Event::default().data(normalize_newlines(fragment))
}

pub fn error_event(message: &str) -> Event {
    let data = serde_json::json!({ "message": message }).to_string();
    Event::default().event("error").data(data)
}

impl StreamResponder for SseResponder {
    async fn send(&mut self, fragment: &str) -> Result<(), ResponderClosed> {
        if self.closed {
            return Err(ResponderClosed);
        }
        if self.tx.send(fragment_event(fragment)).await.is_err() {
            self.closed = true;
            return Err(ResponderClosed);
        }
        Ok(())
    }

    fn fail(&mut self, message: &str) {
        if self.closed {
            return;
        }
        // Best effort: a full buffer means the client is not reading anyway.
        if let Err(e) = self.tx.try_send(error_event(message)) {
            tracing::debug!(error = %e, "Could not deliver error event");
            if matches!(e, mpsc::error::TrySendError::Closed(_)) {
                self.closed = true;
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }
}
