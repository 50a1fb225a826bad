//! PTZCam Recorder - records a PTZ webcam to a video file.
//!
//! This is the main library crate. It chooses between a hardware encoder
//! process reading the camera directly and an in-process software encoder
//! fed from the live preview, and owns the single recording session.

pub mod capture;
pub mod commands;
pub mod config;
pub mod encoder;
pub mod recorder;
pub mod software;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::RecorderConfig;
pub use recorder::{RecordingEvent, RecordingOptions, RecordingOrchestrator};
pub use utils::error::{CommandResponse, RecordingError, RecordingResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging from `RUST_LOG`
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ptzcam_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
