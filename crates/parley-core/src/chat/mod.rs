//! Chat persistence and completion orchestration for Parley.
//!
//! - `ChatRepository`: storage port implemented by the infrastructure layer
//! - `ChatService`: list/get/create operations over the repository
//! - `CompletionOrchestrator`: one streamed completion turn, end to end
//! - `StreamResponder`: the client-facing sink a turn relays fragments into
//! - `projection`: stable wire shapes for chats and messages

pub mod locks;
pub mod orchestrator;
pub mod projection;
pub mod repository;
pub mod responder;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;
