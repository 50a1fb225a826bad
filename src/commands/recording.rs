//! Recording command handlers
//!
//! The boundary the UI calls. Nothing here returns an error value: failures
//! are reported inside `CommandResponse`.

use crate::capture::devices::DeviceResolver;
use crate::capture::traits::{AudioSourceInfo, PreviewSurface, VideoDeviceInfo};
use crate::config::RecorderConfig;
use crate::encoder::probe::EncoderCapabilities;
use crate::recorder::state::{RecordingOptions, RecordingStatus};
use crate::recorder::RecordingOrchestrator;
use crate::software::codec::MediaEncoderFactory;
use crate::utils::error::CommandResponse;
use std::sync::Arc;

/// Application state for recording
pub struct RecorderState {
    pub orchestrator: Arc<RecordingOrchestrator>,
    resolver: DeviceResolver,
}

impl RecorderState {
    pub fn new(
        config: RecorderConfig,
        preview: Arc<dyn PreviewSurface>,
        encoders: Arc<dyn MediaEncoderFactory>,
    ) -> Self {
        let resolver = DeviceResolver::new(&config);
        Self {
            orchestrator: Arc::new(RecordingOrchestrator::from_config(config, preview, encoders)),
            resolver,
        }
    }
}

/// Hardware encoder families available on this host
pub async fn check_encoders(state: &RecorderState) -> EncoderCapabilities {
    state.orchestrator.check_encoders().await
}

/// Device node of the first camera matching `name_hint`
pub async fn find_video_device(state: &RecorderState, name_hint: &str) -> Option<String> {
    state.orchestrator.find_video_device(name_hint).await
}

/// Audio source of the first input matching `name_hint`
pub async fn find_audio_device(state: &RecorderState, name_hint: &str) -> Option<String> {
    state.orchestrator.find_audio_device(name_hint).await
}

/// Get list of video capture nodes
pub async fn get_cameras(state: &RecorderState) -> Vec<VideoDeviceInfo> {
    state.resolver.list_video_devices().await
}

/// Get list of audio sources
pub async fn get_audio_devices(state: &RecorderState) -> Vec<AudioSourceInfo> {
    state.resolver.list_audio_sources().await
}

/// Start recording
pub async fn start_recording(state: &RecorderState, options: RecordingOptions) -> CommandResponse {
    state.orchestrator.start(options).await.into()
}

/// Feed a raw RGBA frame to a raw-frame hardware session
pub async fn write_frame(state: &RecorderState, bytes: &[u8]) -> bool {
    state.orchestrator.write_frame(bytes).await
}

/// Stop recording
pub async fn stop_recording(state: &RecorderState) -> CommandResponse {
    state.orchestrator.stop().await.into()
}

/// Get current recording state and elapsed time
pub fn recording_status(state: &RecorderState) -> RecordingStatus {
    state.orchestrator.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::VideoFrame;
    use crate::recorder::state::SessionState;
    use crate::software::capture::tests::{CountingEncoders, StillPreview};
    use std::path::PathBuf;

    fn state(dir: &std::path::Path) -> RecorderState {
        let config = RecorderConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            audio_lister_path: PathBuf::from("/nonexistent/pactl"),
            sysfs_video_root: dir.join("sys"),
            recordings_dir: dir.join("videos"),
            fallback_width: 32,
            fallback_height: 18,
            ..Default::default()
        };
        let preview = StillPreview::video_only(Some(VideoFrame {
            width: 32,
            height: 18,
            data: vec![1; 32 * 18 * 4],
        }));
        RecorderState::new(config, Arc::new(preview), Arc::new(CountingEncoders::default()))
    }

    #[tokio::test]
    async fn test_missing_tools_mean_no_hardware_and_no_devices() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        assert_eq!(check_encoders(&state).await, EncoderCapabilities::none());
        assert_eq!(find_video_device(&state, "obsbot").await, None);
        assert_eq!(find_audio_device(&state, "obsbot").await, None);
        assert!(get_cameras(&state).await.is_empty());
        assert!(get_audio_devices(&state).await.is_empty());
    }

    #[tokio::test]
    async fn test_record_round_trip_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let started = start_recording(&state, RecordingOptions::default()).await;
        assert!(started.success);
        let path = started.output_path.clone().unwrap();
        assert!(path.ends_with(".webm"));
        assert_eq!(recording_status(&state).state, SessionState::Active);

        // Software sessions take no raw frames.
        assert!(!write_frame(&state, &[0u8; 16]).await);

        let stopped = stop_recording(&state).await;
        assert!(stopped.success);
        assert_eq!(stopped.output_path.as_deref(), Some(path.as_str()));

        let again = stop_recording(&state).await;
        assert!(!again.success);
        assert_eq!(again.error.as_deref(), Some("NotRecording"));
        assert!(again.output_path.is_none());
    }

    #[tokio::test]
    async fn test_invalid_options_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let response = start_recording(
            &state,
            RecordingOptions {
                fps: 0,
                ..Default::default()
            },
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("InvalidOptions"));
        assert_eq!(recording_status(&state).state, SessionState::Idle);
    }
}
