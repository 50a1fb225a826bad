//! Recording state management
//!
//! Defines the session state machine, the session record and the options a
//! recording is started with.

use crate::utils::error::{RecordingError, RecordingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state of the orchestrator's single session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    Idle,
    /// Choosing a path and bringing it up
    Starting,
    /// Currently recording
    Active,
    /// Tearing down the active path
    Stopping,
    /// Teardown finished, output written
    Stopped,
    /// The session ended in an error
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// States in which a new `start` must be refused
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Active | SessionState::Stopping
        )
    }
}

/// Which path produces the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// External encoder process
    Hardware,
    /// In-process canvas capture
    Software,
}

impl std::fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingMode::Hardware => write!(f, "hardware"),
            RecordingMode::Software => write!(f, "software"),
        }
    }
}

/// The single live recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,
    pub mode: RecordingMode,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

impl RecordingSession {
    pub fn new(mode: RecordingMode, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            output_path,
            started_at: Utc::now(),
            state: SessionState::Active,
        }
    }

    /// Milliseconds since the session started
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Options for starting a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Whether the hardware path may be used at all
    #[serde(default = "default_prefer_hardware")]
    pub prefer_hardware: bool,

    /// Video device node; resolved from the configured name hint when absent
    #[serde(default)]
    pub device_path: Option<String>,

    /// Audio source name; resolved from the configured name hint when absent
    #[serde(default)]
    pub audio_device: Option<String>,
}

fn default_prefer_hardware() -> bool {
    true
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
            fps: 30,
            prefer_hardware: true,
            device_path: None,
            audio_device: None,
        }
    }
}

impl RecordingOptions {
    /// Check dimensions and cap the frame rate to what the device negotiated
    pub fn validate(mut self, negotiated_fps: Option<u32>) -> RecordingResult<Self> {
        if self.width == 0 || self.height == 0 {
            return Err(RecordingError::InvalidOptions(format!(
                "resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(RecordingError::InvalidOptions(
                "frame rate must be positive".to_string(),
            ));
        }

        if let Some(max_fps) = negotiated_fps.filter(|f| *f > 0) {
            if self.fps > max_fps {
                tracing::debug!("Capping frame rate {} to negotiated {}", self.fps, max_fps);
                self.fps = max_fps;
            }
        }

        self.device_path = self.device_path.filter(|p| !p.trim().is_empty());
        self.audio_device = self.audio_device.filter(|a| !a.trim().is_empty());
        Ok(self)
    }
}

/// Snapshot of the orchestrator for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: SessionState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RecordingMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_caps_fps() {
        let options = RecordingOptions {
            fps: 60,
            ..Default::default()
        };
        assert_eq!(options.clone().validate(Some(30)).unwrap().fps, 30);
        assert_eq!(options.clone().validate(None).unwrap().fps, 60);
        assert_eq!(options.validate(Some(0)).unwrap().fps, 60);
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        for options in [
            RecordingOptions { width: 0, ..Default::default() },
            RecordingOptions { height: 0, ..Default::default() },
            RecordingOptions { fps: 0, ..Default::default() },
        ] {
            assert!(matches!(
                options.validate(None),
                Err(RecordingError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn test_validate_drops_blank_device_names() {
        let options = RecordingOptions {
            device_path: Some("  ".to_string()),
            audio_device: Some(String::new()),
            ..Default::default()
        }
        .validate(None)
        .unwrap();
        assert_eq!(options.device_path, None);
        assert_eq!(options.audio_device, None);
    }

    #[test]
    fn test_options_deserialize_from_camel_case() {
        let options: RecordingOptions = serde_json::from_str(
            r#"{"width":3840,"height":2160,"fps":30,"preferHardware":false,"devicePath":"/dev/video2"}"#,
        )
        .unwrap();
        assert!(!options.prefer_hardware);
        assert_eq!(options.device_path.as_deref(), Some("/dev/video2"));
        assert_eq!(options.audio_device, None);
    }

    #[test]
    fn test_busy_states() {
        assert!(SessionState::Starting.is_busy());
        assert!(SessionState::Active.is_busy());
        assert!(SessionState::Stopping.is_busy());
        assert!(!SessionState::Idle.is_busy());
        assert!(!SessionState::Failed.is_busy());
    }
}
