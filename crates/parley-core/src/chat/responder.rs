//! Client-facing sink for streamed completion fragments.
//!
//! The HTTP layer adapts this onto an SSE connection; tests use an
//! in-memory recorder. A responder is closed by dropping it.

use thiserror::Error;

/// The client is gone; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client connection closed")]
pub struct ResponderClosed;

/// Push-style sink for one completion's fragments.
pub trait StreamResponder: Send {
    /// Deliver one fragment as a discrete event.
    ///
    /// Returns `ResponderClosed` once the peer has disconnected. Further
    /// calls after that keep returning `ResponderClosed` without side effects.
    fn send(
        &mut self,
        fragment: &str,
    ) -> impl std::future::Future<Output = Result<(), ResponderClosed>> + Send;

    /// Emit a terminal error event. Best effort and non-blocking.
    fn fail(&mut self, message: &str);

    /// Whether the peer has been observed to disconnect.
    fn is_closed(&self) -> bool;
}
