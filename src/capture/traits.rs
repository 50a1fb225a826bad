//! Capture trait definitions
//!
//! Types describing capture devices and the live preview surface the host
//! application owns.

use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one RGBA frame at this resolution
    pub fn rgba_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A video capture node from the OS device-class registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDeviceInfo {
    /// Device node, e.g. `/dev/video2`
    pub path: String,

    /// Declared display name
    pub name: String,

    /// Numeric suffix of the node (`video2` -> 2)
    pub number: u32,

    /// Whether the node delivers frames (metadata nodes do not)
    pub is_capture: bool,
}

/// An audio source reported by the system audio-source lister
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSourceInfo {
    pub index: u32,

    /// Source name as accepted by the encoder's audio input
    pub name: String,

    pub driver: String,
    pub sample_spec: String,
    pub state: String,
}

impl AudioSourceInfo {
    /// Monitor sources capture playback, not a microphone
    pub fn is_monitor(&self) -> bool {
        self.name.ends_with(".monitor")
    }
}

/// One RGBA frame sampled from the live preview
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,

    /// Tightly packed RGBA pixels
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Sample layout of the preview's live audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioFormat {
    /// Playback time covered by `samples` interleaved samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        let per_second = u64::from(self.sample_rate) * u64::from(self.channels.max(1));
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(samples as u64 * 1_000_000_000 / per_second)
    }
}

/// Interleaved signed 16-bit samples captured from the live audio track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

/// The host's live camera preview
///
/// The preview and the external encoder cannot hold the capture device at the
/// same time, so the orchestrator releases the preview before hardware capture
/// and reacquires it after the encoder has exited.
#[async_trait]
pub trait PreviewSurface: Send + Sync {
    /// Stop the preview stream and give up the capture device
    async fn release(&self) -> RecordingResult<()>;

    /// Reopen the capture device and resume the preview
    ///
    /// Fails with `DeviceConflict` when another process holds the device.
    async fn acquire(&self) -> RecordingResult<()>;

    /// Swap the "Recording" indicator in or out of the preview area
    fn set_recording_indicator(&self, visible: bool);

    /// Frame rate the preview negotiated with the device, if streaming
    fn negotiated_fps(&self) -> Option<u32>;

    /// Most recent frame shown by the preview, if streaming
    fn latest_frame(&self) -> Option<VideoFrame>;

    /// Format of the live audio track, when the preview carries one
    fn audio_format(&self) -> Option<AudioFormat> {
        None
    }

    /// Audio captured since the previous call, oldest first
    fn take_audio(&self) -> Vec<AudioChunk> {
        Vec::new()
    }
}
