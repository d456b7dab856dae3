//! Business logic and repository trait definitions for Parley.
//!
//! This crate defines the "ports" (repository and provider traits) that the
//! infrastructure layer implements, plus the completion orchestrator that
//! drives a single streamed chat turn. It depends only on `parley-types` --
//! never on `parley-infra` or any database/IO crate.

pub mod chat;
pub mod llm;
