//! In-process encoder seam and codec preference

use crate::capture::traits::{AudioFormat, Resolution};
use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use std::time::Duration;

/// Codecs tried in order; the first one the runtime supports wins
pub const CODEC_PREFERENCE: [&str; 3] = [
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm;codecs=vp9,opus",
];

/// Used when none of the preferred codecs is reported as supported
pub const DEFAULT_MIME_TYPE: &str = "video/webm";

/// How often the encoder is asked to hand over encoded data
pub const CHUNK_TIMESLICE: Duration = Duration::from_millis(1000);

/// Pick the most preferred codec the encoder supports
pub fn select_mime_type(factory: &dyn MediaEncoderFactory) -> &'static str {
    CODEC_PREFERENCE
        .into_iter()
        .find(|mime| factory.is_type_supported(mime))
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// File extension for a container mime type
pub fn extension_for(mime_type: &str) -> &'static str {
    let container = mime_type.split(';').next().unwrap_or_default().trim();
    match container {
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        _ => "webm",
    }
}

/// Settings handed to the in-process encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub mime_type: String,
    pub resolution: Resolution,
    pub fps: u32,

    /// Video bitrate in bits per second
    pub bitrate: u32,

    /// Requested interval between emitted chunks
    pub timeslice: Duration,

    /// Live audio track muxed next to the video, if any
    pub audio: Option<AudioFormat>,
}

/// A streaming in-process media encoder
///
/// Fed one RGBA frame at a time at the configured resolution, plus the audio
/// track's samples when the settings named one. Encoded data is returned as
/// chunks whenever the encoder has some ready.
#[async_trait]
pub trait MediaEncoder: Send {
    /// Encode one frame presented `timestamp` after the session started
    async fn encode(&mut self, frame: &[u8], timestamp: Duration) -> RecordingResult<Vec<u8>>;

    /// Encode interleaved samples starting `timestamp` after the session started
    async fn encode_audio(
        &mut self,
        samples: &[i16],
        timestamp: Duration,
    ) -> RecordingResult<Vec<u8>>;

    /// Flush buffered data and finalize the container
    async fn finish(&mut self) -> RecordingResult<Vec<u8>>;
}

/// Creates in-process encoders and reports which codecs the runtime has
pub trait MediaEncoderFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn create(&self, settings: &EncoderSettings) -> RecordingResult<Box<dyn MediaEncoder>>;
}
