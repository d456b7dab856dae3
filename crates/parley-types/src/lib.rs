//! Shared domain types for Parley.
//!
//! Chats, messages, LLM request/stream shapes, configuration, and the error
//! taxonomy shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
