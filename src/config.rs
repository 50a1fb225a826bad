//! Recorder configuration
//!
//! All fields have defaults so a partial (or missing) JSON file is valid.

use crate::utils::error::{RecordingError, RecordingResult};
use crate::utils::paths::default_recordings_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the recording pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Encoder binary (looked up in PATH when not absolute)
    pub ffmpeg_path: PathBuf,

    /// Audio source lister (`pactl list short sources`)
    pub audio_lister_path: PathBuf,

    /// Device-class registry for video devices
    pub sysfs_video_root: PathBuf,

    /// Directory holding the device nodes
    pub dev_root: PathBuf,

    /// Where finished recordings are written
    pub recordings_dir: PathBuf,

    /// Product prefix for output file names
    pub file_prefix: String,

    /// Search hint used to find the camera when the caller gives no device
    pub device_name_hint: String,

    pub probe_timeout_ms: u64,

    /// How long a freshly spawned encoder must survive to count as started
    pub startup_grace_ms: u64,

    /// Pause between releasing the preview and opening the device again
    pub device_settle_ms: u64,

    /// How long to wait for a graceful exit before force-killing
    pub stop_timeout_ms: u64,

    pub fallback_width: u32,
    pub fallback_height: u32,
    pub fallback_fps: u32,

    /// Software encoder bitrate in bits per second
    pub fallback_bitrate: u32,

    /// Render node used by the VAAPI encoder family
    pub vaapi_device: String,

    /// Pixel format requested from the camera in direct device capture
    pub device_input_format: String,

    /// Use raw-frame stdin capture instead of the software path when the
    /// device cannot be resolved but a hardware encoder exists
    pub allow_raw_frame_capture: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            audio_lister_path: PathBuf::from("pactl"),
            sysfs_video_root: PathBuf::from("/sys/class/video4linux"),
            dev_root: PathBuf::from("/dev"),
            recordings_dir: default_recordings_dir(),
            file_prefix: "PTZCam".to_string(),
            device_name_hint: "obsbot".to_string(),
            probe_timeout_ms: 5_000,
            startup_grace_ms: 750,
            device_settle_ms: 500,
            stop_timeout_ms: 10_000,
            fallback_width: 1920,
            fallback_height: 1080,
            fallback_fps: 30,
            fallback_bitrate: 8_000_000,
            vaapi_device: "/dev/dri/renderD128".to_string(),
            device_input_format: "mjpeg".to_string(),
            allow_raw_frame_capture: false,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> RecordingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)
            .map_err(|e| RecordingError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> RecordingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RecordingError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> RecordingResult<()> {
        if self.fallback_width == 0 || self.fallback_height == 0 || self.fallback_fps == 0 {
            return Err(RecordingError::Config(
                "fallback resolution and frame rate must be positive".to_string(),
            ));
        }
        if self.device_input_format.trim().is_empty() {
            return Err(RecordingError::Config(
                "deviceInputFormat must not be empty".to_string(),
            ));
        }
        if self.file_prefix.trim().is_empty() {
            return Err(RecordingError::Config("filePrefix must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn device_settle(&self) -> Duration {
        Duration::from_millis(self.device_settle_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptzcam-recorder")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RecorderConfig =
            serde_json::from_str(r#"{ "ffmpegPath": "/opt/ffmpeg/bin/ffmpeg", "fallbackFps": 25 }"#)
                .unwrap();
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.fallback_fps, 25);
        assert_eq!(config.fallback_width, 1920);
        assert_eq!(config.device_input_format, "mjpeg");
        assert!(!config.allow_raw_frame_capture);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = RecorderConfig {
            file_prefix: "Studio".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RecorderConfig::load(&path).unwrap();
        assert_eq!(loaded.file_prefix, "Studio");
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "fallbackWidth": 0 }"#).unwrap();

        assert!(RecorderConfig::load(&path).is_err());
        let config = RecorderConfig::load_or_default(&path);
        assert_eq!(config.fallback_width, 1920);
    }
}
