//! Infrastructure layer for Parley.
//!
//! Contains implementations of the traits defined in `parley-core`:
//! SQLite chat storage, OpenAI-compatible completion providers, and the
//! data directory / `config.toml` loader.

pub mod config;
pub mod llm;
pub mod sqlite;
