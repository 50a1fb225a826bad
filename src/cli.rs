//! CLI commands
//!
//! Headless host for the recorder. With the `gstreamer` feature it opens the
//! camera as a live preview so software capture has frames; without it only
//! the hardware path can produce a recording.

use anyhow::{bail, Context};
use async_trait::async_trait;
use ptzcam_recorder::capture::devices::DeviceResolver;
use ptzcam_recorder::capture::traits::{PreviewSurface, VideoFrame};
use ptzcam_recorder::commands::recording::{self, RecorderState};
use ptzcam_recorder::config::{default_config_path, RecorderConfig};
use ptzcam_recorder::software::codec::MediaEncoderFactory;
use ptzcam_recorder::{RecordingEvent, RecordingOptions, RecordingResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// No preview window; the device is never held by this process
struct HeadlessPreview;

#[async_trait]
impl PreviewSurface for HeadlessPreview {
    async fn release(&self) -> RecordingResult<()> {
        Ok(())
    }

    async fn acquire(&self) -> RecordingResult<()> {
        Ok(())
    }

    fn set_recording_indicator(&self, _visible: bool) {}

    fn negotiated_fps(&self) -> Option<u32> {
        None
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        None
    }
}

#[cfg(feature = "gstreamer")]
fn encoder_factory() -> anyhow::Result<Arc<dyn MediaEncoderFactory>> {
    let factory = ptzcam_recorder::software::WebmEncoderFactory::new()
        .context("failed to set up the software encoder")?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "gstreamer"))]
fn encoder_factory() -> anyhow::Result<Arc<dyn MediaEncoderFactory>> {
    Ok(Arc::new(NoSoftwareEncoder))
}

/// Built without the `gstreamer` feature: no in-process encoder exists
#[cfg(not(feature = "gstreamer"))]
struct NoSoftwareEncoder;

#[cfg(not(feature = "gstreamer"))]
impl MediaEncoderFactory for NoSoftwareEncoder {
    fn is_type_supported(&self, _mime_type: &str) -> bool {
        false
    }

    fn create(
        &self,
        _settings: &ptzcam_recorder::software::codec::EncoderSettings,
    ) -> RecordingResult<Box<dyn ptzcam_recorder::software::codec::MediaEncoder>> {
        Err(ptzcam_recorder::RecordingError::Encoding(
            "software capture needs the gstreamer feature".to_string(),
        ))
    }
}

/// Open the camera for software capture
///
/// A camera that cannot be opened leaves the hardware path usable, so it is
/// only reported.
#[cfg(feature = "gstreamer")]
async fn live_preview(video: Option<&str>, audio: Option<&str>) -> Arc<dyn PreviewSurface> {
    use ptzcam_recorder::capture::CameraPreview;

    let Some(video) = video else {
        tracing::warn!("No camera found; software capture will have no frames");
        return Arc::new(HeadlessPreview);
    };
    match CameraPreview::new(video, audio.map(str::to_string)) {
        Ok(preview) => {
            if let Err(e) = preview.acquire().await {
                tracing::warn!("Live preview unavailable: {}", e);
            }
            Arc::new(preview)
        }
        Err(e) => {
            tracing::warn!("Live preview unavailable: {}", e);
            Arc::new(HeadlessPreview)
        }
    }
}

#[cfg(not(feature = "gstreamer"))]
async fn live_preview(_video: Option<&str>, _audio: Option<&str>) -> Arc<dyn PreviewSurface> {
    Arc::new(HeadlessPreview)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<RecorderConfig> {
    match path {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RecorderConfig::load_or_default(&default_config_path())),
    }
}

fn recorder_state(config: RecorderConfig) -> anyhow::Result<RecorderState> {
    Ok(RecorderState::new(
        config,
        Arc::new(HeadlessPreview),
        encoder_factory()?,
    ))
}

pub async fn show_encoders(config: RecorderConfig) -> anyhow::Result<()> {
    let state = recorder_state(config)?;
    let caps = recording::check_encoders(&state).await;

    println!("Hardware encoders:");
    println!("  nvenc: {}", if caps.has_nvenc { "yes" } else { "no" });
    println!("  vaapi: {}", if caps.has_vaapi { "yes" } else { "no" });
    println!("  qsv:   {}", if caps.has_qsv { "yes" } else { "no" });
    match caps.best() {
        Some(encoder) => println!("Recording would use {}", encoder.codec()),
        None => println!("No hardware encoder; recording would use software capture"),
    }
    Ok(())
}

pub async fn list_devices(config: RecorderConfig) -> anyhow::Result<()> {
    let hint = config.device_name_hint.clone();
    let state = recorder_state(config)?;

    let cameras = recording::get_cameras(&state).await;
    if cameras.is_empty() {
        println!("No video devices found.");
    } else {
        println!("Video devices:");
        for camera in &cameras {
            let kind = if camera.is_capture { "" } else { " (metadata)" };
            println!("  {}  {}{}", camera.path, camera.name, kind);
        }
    }

    let sources = recording::get_audio_devices(&state).await;
    if !sources.is_empty() {
        println!();
        println!("Audio sources:");
        for source in &sources {
            println!("  [{}] {} ({})", source.index, source.name, source.state);
        }
    }

    println!();
    println!(
        "Matching \"{}\": video={}, audio={}",
        hint,
        recording::find_video_device(&state, &hint)
            .await
            .unwrap_or_else(|| "none".to_string()),
        recording::find_audio_device(&state, &hint)
            .await
            .unwrap_or_else(|| "none".to_string()),
    );
    Ok(())
}

pub async fn record(
    config: RecorderConfig,
    options: RecordingOptions,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let resolver = DeviceResolver::new(&config);
    let hint = config.device_name_hint.clone();
    let video = match options.device_path.clone() {
        Some(path) => Some(path),
        None => resolver.resolve_video_device(&hint).await,
    };
    let audio = match options.audio_device.clone() {
        Some(source) => Some(source),
        None => resolver.resolve_audio_device(&hint).await,
    };
    let preview = live_preview(video.as_deref(), audio.as_deref()).await;
    let options = RecordingOptions {
        device_path: video,
        audio_device: audio,
        ..options
    };

    let state = RecorderState::new(config, preview, encoder_factory()?);
    let mut events = state.orchestrator.subscribe();

    let started = recording::start_recording(&state, options).await;
    if !started.success {
        bail!(
            "recording failed to start: {}",
            started.message.unwrap_or_default()
        );
    }
    let output_path = started.output_path.unwrap_or_default();
    println!("Recording to {}", output_path);
    match seconds {
        Some(s) => println!("Stopping after {}s (Ctrl-C to stop early)", s),
        None => println!("Press Ctrl-C to stop"),
    }

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    let failed = async {
        loop {
            match events.recv().await {
                Ok(RecordingEvent::Fallback { reason }) => {
                    println!("Hardware capture unavailable ({}), using software capture", reason)
                }
                Ok(RecordingEvent::Failed { error }) => break error,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break std::future::pending::<String>().await,
            }
        }
    };

    tokio::select! {
        _ = deadline => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            println!();
        }
        error = failed => {
            bail!("recording to {} ended early: {}", output_path, error);
        }
    }

    let stopped = recording::stop_recording(&state).await;
    if !stopped.success {
        bail!(
            "recording failed: {}",
            stopped.message.unwrap_or_default()
        );
    }

    println!(
        "Saved {}",
        stopped.output_path.as_deref().unwrap_or_default()
    );
    Ok(())
}
