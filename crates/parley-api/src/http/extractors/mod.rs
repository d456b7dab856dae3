//! Request extractors.

pub mod valid_json;
