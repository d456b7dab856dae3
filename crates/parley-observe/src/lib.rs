//! Observability setup for Parley: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
