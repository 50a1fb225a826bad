//! Command handlers
//!
//! The request/response boundary consumed by the UI layer.

pub mod recording;
