//! Error types and handling
//!
//! Error taxonomy for the recording pipeline and the response type handed
//! across the command boundary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Failed to start encoder process: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture device is busy: {0}. Stop the other application using the camera and try again")]
    DeviceConflict(String),

    #[error("Invalid recording options: {0}")]
    InvalidOptions(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Encoder process error: {0}")]
    Process(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preview error: {0}")]
    Preview(String),
}

impl RecordingError {
    /// Stable error code reported to callers of the command boundary
    pub fn code(&self) -> &'static str {
        match self {
            RecordingError::AlreadyRecording => "AlreadyRecording",
            RecordingError::NotRecording => "NotRecording",
            RecordingError::Spawn(_) => "SpawnError",
            RecordingError::Io(_) => "IoError",
            RecordingError::DeviceConflict(_) => "DeviceConflict",
            RecordingError::InvalidOptions(_) => "InvalidOptions",
            RecordingError::Encoding(_) => "EncodingError",
            RecordingError::Process(_) => "ProcessError",
            RecordingError::Config(_) => "ConfigError",
            RecordingError::Preview(_) => "PreviewError",
        }
    }

    /// Busy-class errors are caller misuse and never worth retrying
    pub fn is_busy(&self) -> bool {
        matches!(self, RecordingError::AlreadyRecording | RecordingError::NotRecording)
    }
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Response returned by every boundary command
///
/// Boundary calls never fail with an error value; failures are reported
/// through `success: false` plus an error code and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(output_path: &Path) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.to_string_lossy().to_string()),
            error: None,
            message: None,
        }
    }
}

impl From<RecordingError> for CommandResponse {
    fn from(error: RecordingError) -> Self {
        CommandResponse {
            success: false,
            output_path: None,
            error: Some(error.code().to_string()),
            message: Some(error.to_string()),
        }
    }
}

impl From<RecordingResult<std::path::PathBuf>> for CommandResponse {
    fn from(result: RecordingResult<std::path::PathBuf>) -> Self {
        match result {
            Ok(path) => CommandResponse::ok(&path),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_codes() {
        assert_eq!(RecordingError::NotRecording.code(), "NotRecording");
        assert_eq!(RecordingError::Spawn("missing".into()).code(), "SpawnError");
        assert!(RecordingError::AlreadyRecording.is_busy());
        assert!(!RecordingError::DeviceConflict("/dev/video0".into()).is_busy());
    }

    #[test]
    fn test_failure_response_serialization() {
        let response: CommandResponse = RecordingError::NotRecording.into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "NotRecording");
        assert!(json.get("outputPath").is_none());
    }

    #[test]
    fn test_success_response_carries_path() {
        let response = CommandResponse::from(Ok(PathBuf::from("/tmp/out.mp4")));
        assert!(response.success);
        assert_eq!(response.output_path.as_deref(), Some("/tmp/out.mp4"));
        assert!(response.error.is_none());
    }
}
