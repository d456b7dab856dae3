//! HTTP/REST API layer for Parley.
//!
//! Axum-based API under `/v1/` with JSON error envelopes, SSE completion
//! streaming, and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
pub mod sse;
