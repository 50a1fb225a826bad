//! Shared utilities
//!
//! Error types and output path helpers used across the crate.

pub mod error;
pub mod paths;

pub use error::{CommandResponse, RecordingError, RecordingResult};
