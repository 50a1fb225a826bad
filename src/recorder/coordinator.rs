//! Recording orchestrator
//!
//! Chooses between the hardware encoder process and the in-process software
//! path, hands the capture device over between the preview and the encoder,
//! and owns the single recording session.

use super::channel::{CapabilitySource, DeviceLookup, HardwareRecorder};
use super::decision::{choose_capture_path, CapturePath, DeviceHandle, SoftwareReason};
use super::state::{RecordingMode, RecordingOptions, RecordingSession, RecordingStatus, SessionState};
use crate::capture::devices::DeviceResolver;
use crate::capture::traits::{PreviewSurface, Resolution};
use crate::config::RecorderConfig;
use crate::encoder::args::CaptureInput;
use crate::encoder::probe::{EncoderCapabilities, EncoderProber};
use crate::encoder::process::{EncoderProcessManager, EncoderSession, HardwareRequest};
use crate::software::capture::{SoftwareCapture, SoftwareCaptureSettings};
use crate::software::codec::MediaEncoderFactory;
use crate::utils::error::{RecordingError, RecordingResult};
use crate::utils::paths::timestamped_output_path;
use chrono::Utc;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Recording started on the given path
    Started {
        mode: RecordingMode,
        output_path: PathBuf,
    },
    /// Hardware capture was skipped or failed; software capture is used
    Fallback { reason: String },
    /// Recording stopped and the file is complete
    Stopped { output_path: PathBuf },
    /// Error occurred, including a preview that could not get the device back
    Failed { error: String },
}

#[derive(Debug, Default)]
struct SessionSlot {
    state: SessionState,
    session: Option<RecordingSession>,

    /// The preview gave up the device for this session and must get it back
    preview_released: bool,
}

type SharedSlot = Arc<RwLock<SessionSlot>>;

/// Outcome of bringing up a capture path
struct Started {
    session: RecordingSession,
    preview_released: bool,
    encoder: Option<EncoderSession>,
}

impl Started {
    fn software(session: RecordingSession) -> Self {
        Self {
            session,
            preview_released: false,
            encoder: None,
        }
    }

    fn hardware(encoder: EncoderSession, preview_released: bool) -> Self {
        Self {
            session: RecordingSession::new(RecordingMode::Hardware, encoder.output_path.clone()),
            preview_released,
            encoder: Some(encoder),
        }
    }
}

/// Owns the recording lifecycle
pub struct RecordingOrchestrator {
    config: RecorderConfig,
    capabilities: Arc<dyn CapabilitySource>,
    devices: Arc<dyn DeviceLookup>,
    hardware: Arc<dyn HardwareRecorder>,
    software: SoftwareCapture,
    preview: Arc<dyn PreviewSurface>,
    slot: SharedSlot,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingOrchestrator {
    pub fn new(
        config: RecorderConfig,
        capabilities: Arc<dyn CapabilitySource>,
        devices: Arc<dyn DeviceLookup>,
        hardware: Arc<dyn HardwareRecorder>,
        preview: Arc<dyn PreviewSurface>,
        encoders: Arc<dyn MediaEncoderFactory>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            capabilities,
            devices,
            hardware,
            software: SoftwareCapture::new(encoders, preview.clone()),
            preview,
            slot: Arc::new(RwLock::new(SessionSlot::default())),
            event_tx,
        }
    }

    /// Orchestrator backed by the system encoder binary, device registry
    /// and audio-source lister named in `config`
    pub fn from_config(
        config: RecorderConfig,
        preview: Arc<dyn PreviewSurface>,
        encoders: Arc<dyn MediaEncoderFactory>,
    ) -> Self {
        let prober = EncoderProber::new(config.ffmpeg_path.clone(), config.probe_timeout());
        let resolver = DeviceResolver::new(&config);
        let manager = EncoderProcessManager::new(config.clone());
        Self::new(
            config,
            Arc::new(prober),
            Arc::new(resolver),
            Arc::new(manager),
            preview,
            encoders,
        )
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.slot.read().state
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.slot.read().session.clone()
    }

    pub fn status(&self) -> RecordingStatus {
        let slot = self.slot.read();
        RecordingStatus {
            state: slot.state,
            mode: slot.session.as_ref().map(|s| s.mode),
            output_path: slot
                .session
                .as_ref()
                .map(|s| s.output_path.to_string_lossy().to_string()),
            elapsed_ms: slot.session.as_ref().map_or(0, |s| s.elapsed_ms()),
        }
    }

    /// Whether an encoder process is currently running
    pub fn encoder_live(&self) -> bool {
        self.hardware.is_live()
    }

    pub async fn check_encoders(&self) -> EncoderCapabilities {
        self.capabilities.capabilities().await
    }

    pub async fn find_video_device(&self, name_hint: &str) -> Option<String> {
        self.devices.resolve_video_device(name_hint).await
    }

    pub async fn find_audio_device(&self, name_hint: &str) -> Option<String> {
        self.devices.resolve_audio_device(name_hint).await
    }

    /// Start recording
    ///
    /// Refused with `AlreadyRecording` unless the orchestrator is idle. A
    /// hardware encoder that fails to spawn is replaced by software capture
    /// without reporting an error.
    ///
    /// Dropping the returned future before it resolves abandons the start:
    /// any encoder it spawned is stopped and the preview gets the device back.
    pub async fn start(&self, options: RecordingOptions) -> RecordingResult<PathBuf> {
        {
            let mut slot = self.slot.write();
            if slot.state.is_busy() {
                return Err(RecordingError::AlreadyRecording);
            }
            *slot = SessionSlot {
                state: SessionState::Starting,
                ..Default::default()
            };
        }
        let mut guard = StartGuard {
            slot: self.slot.clone(),
            hardware: self.hardware.clone(),
            preview: self.preview.clone(),
            armed: true,
        };

        let result = self.start_session(options).await;
        guard.armed = false;

        match result {
            Ok(started) => {
                let output_path = started.session.output_path.clone();
                let mode = started.session.mode;
                let session_id = started.session.id;
                {
                    let mut slot = self.slot.write();
                    slot.state = SessionState::Active;
                    slot.session = Some(started.session);
                    slot.preview_released = started.preview_released;
                }

                tracing::info!("Recording started ({}): {:?}", mode, output_path);
                let _ = self.event_tx.send(RecordingEvent::Started {
                    mode,
                    output_path: output_path.clone(),
                });
                if let Some(encoder) = started.encoder {
                    self.supervise_encoder(session_id, encoder);
                }
                Ok(output_path)
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                fail_session(&self.slot, &self.event_tx, &e);
                Err(e)
            }
        }
    }

    /// Feed one raw frame to a raw-frame hardware session
    ///
    /// Returns false without doing anything when no hardware session is live.
    pub async fn write_frame(&self, bytes: &[u8]) -> bool {
        let is_hardware = {
            let slot = self.slot.read();
            slot.state == SessionState::Active
                && slot.session.as_ref().map(|s| s.mode) == Some(RecordingMode::Hardware)
        };
        if !is_hardware {
            return false;
        }
        self.hardware.write_frame(bytes).await
    }

    /// Stop recording
    ///
    /// Waits for the active path to finish writing, then restores the live
    /// preview if it had released the device. A preview that cannot get the
    /// device back is reported as a `Failed` event; the recording itself is
    /// still complete and its path is returned.
    pub async fn stop(&self) -> RecordingResult<PathBuf> {
        let (mode, preview_released) = {
            let mut slot = self.slot.write();
            if slot.state != SessionState::Active {
                return Err(RecordingError::NotRecording);
            }
            let preview_released = slot.preview_released;
            let Some(session) = slot.session.as_mut() else {
                return Err(RecordingError::NotRecording);
            };
            session.state = SessionState::Stopping;
            let mode = session.mode;
            slot.state = SessionState::Stopping;
            (mode, preview_released)
        };

        tracing::info!("Stopping {} recording", mode);

        let result = match mode {
            RecordingMode::Hardware => {
                let result = match self.hardware.stop().await {
                    Err(RecordingError::NotRecording) => Err(RecordingError::Process(
                        "encoder exited before the recording was stopped".to_string(),
                    )),
                    other => other,
                };
                if preview_released {
                    if let Err(e) = restore_preview(self.preview.as_ref()).await {
                        tracing::error!("Preview could not get the device back: {}", e);
                        let _ = self.event_tx.send(RecordingEvent::Failed {
                            error: e.to_string(),
                        });
                    }
                }
                result
            }
            RecordingMode::Software => self.software.stop().await,
        };

        match result {
            Ok(output_path) => {
                {
                    let mut slot = self.slot.write();
                    if let Some(session) = slot.session.as_mut() {
                        session.state = SessionState::Stopped;
                    }
                    slot.state = SessionState::Stopped;
                }
                let _ = self.event_tx.send(RecordingEvent::Stopped {
                    output_path: output_path.clone(),
                });

                *self.slot.write() = SessionSlot::default();
                tracing::info!("Recording stopped: {:?}", output_path);
                Ok(output_path)
            }
            Err(e) => {
                tracing::error!("Failed to stop recording: {}", e);
                fail_session(&self.slot, &self.event_tx, &e);
                Err(e)
            }
        }
    }

    /// Watch the encoder of session `session_id` for an exit nobody asked for
    ///
    /// A `stop` moves the slot out of `Active` before it interrupts the
    /// encoder, so an exit seen while still `Active` is a crash. The slot is
    /// claimed as `Stopping` while the preview is restored, then failed.
    fn supervise_encoder(&self, session_id: Uuid, encoder: EncoderSession) {
        let slot = self.slot.clone();
        let preview = self.preview.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let pid = encoder.pid;
            let exit = encoder.exited().await;

            let preview_released = {
                let mut slot = slot.write();
                let ours = slot.state == SessionState::Active
                    && slot.session.as_ref().map(|s| s.id) == Some(session_id);
                if !ours {
                    return;
                }
                slot.state = SessionState::Stopping;
                if let Some(session) = slot.session.as_mut() {
                    session.state = SessionState::Stopping;
                }
                slot.preview_released
            };

            let error = RecordingError::Process(format!(
                "encoder {} exited while recording: {:?}",
                pid, exit
            ));
            tracing::error!("{}", error);

            if preview_released {
                if let Err(e) = restore_preview(preview.as_ref()).await {
                    tracing::error!("Preview could not get the device back: {}", e);
                    let _ = event_tx.send(RecordingEvent::Failed {
                        error: e.to_string(),
                    });
                }
            }
            fail_session(&slot, &event_tx, &error);
        });
    }

    async fn start_session(&self, options: RecordingOptions) -> RecordingResult<Started> {
        let options = options.validate(self.preview.negotiated_fps())?;

        let capabilities = if options.prefer_hardware {
            self.capabilities.capabilities().await
        } else {
            EncoderCapabilities::none()
        };
        let device = if options.prefer_hardware && capabilities.any() {
            self.resolve_devices(&options).await
        } else {
            DeviceHandle::default()
        };

        let path = choose_capture_path(
            &capabilities,
            options.prefer_hardware,
            &device,
            self.config.allow_raw_frame_capture,
        );
        tracing::debug!("Capture path for {:?}: {:?}", options, path);

        match path {
            CapturePath::HardwareDirect {
                encoder,
                device_path,
                audio_source,
            } => {
                if audio_source.is_none() {
                    tracing::info!("No audio source found, recording video only");
                }
                let request = HardwareRequest {
                    encoder,
                    input: CaptureInput::Device {
                        device_path,
                        audio_source,
                    },
                    width: options.width,
                    height: options.height,
                    fps: options.fps,
                };
                self.start_hardware_direct(&request, &options).await
            }
            CapturePath::HardwareRaw { encoder } => {
                let request = HardwareRequest {
                    encoder,
                    input: CaptureInput::RawFrames,
                    width: options.width,
                    height: options.height,
                    fps: options.fps,
                };
                match self.hardware.start(&request).await {
                    Ok(encoder) => Ok(Started::hardware(encoder, false)),
                    Err(RecordingError::Spawn(e)) => {
                        self.fall_back(SoftwareReason::SpawnFailed, &e);
                        self.start_software(&options)
                    }
                    Err(e) => Err(e),
                }
            }
            CapturePath::Software { reason } => {
                if reason != SoftwareReason::HardwareNotPreferred {
                    self.fall_back(reason, "");
                }
                self.start_software(&options)
            }
        }
    }

    async fn resolve_devices(&self, options: &RecordingOptions) -> DeviceHandle {
        let hint = &self.config.device_name_hint;
        let video_device_path = match &options.device_path {
            Some(path) => Some(path.clone()),
            None => self.devices.resolve_video_device(hint).await,
        };
        let audio_source_name = match &options.audio_device {
            Some(source) => Some(source.clone()),
            None => self.devices.resolve_audio_device(hint).await,
        };
        tracing::debug!(
            "Resolved devices: video={:?}, audio={:?}",
            video_device_path,
            audio_source_name
        );
        DeviceHandle {
            video_device_path,
            audio_source_name,
        }
    }

    /// Hand the device to the encoder process; the preview lets go first
    async fn start_hardware_direct(
        &self,
        request: &HardwareRequest,
        options: &RecordingOptions,
    ) -> RecordingResult<Started> {
        let device = request.input.device_label().to_string();
        if let Err(e) = self.preview.release().await {
            tracing::error!("Preview did not release {}: {}", device, e);
            return Err(RecordingError::DeviceConflict(device));
        }
        self.slot.write().preview_released = true;
        self.preview.set_recording_indicator(true);
        tokio::time::sleep(self.config.device_settle()).await;

        let error = match self.hardware.start(request).await {
            Ok(encoder) => return Ok(Started::hardware(encoder, true)),
            Err(e) => e,
        };

        let restored = restore_preview(self.preview.as_ref()).await;
        self.slot.write().preview_released = false;
        match (error, restored) {
            (RecordingError::Spawn(e), Ok(())) => {
                self.fall_back(SoftwareReason::SpawnFailed, &e);
                self.start_software(options)
            }
            (RecordingError::Spawn(e), Err(conflict)) => {
                tracing::error!("Encoder failed to spawn ({}) and the preview lost {}", e, device);
                Err(conflict)
            }
            (error, Err(restore_error)) => {
                tracing::warn!("Failed to restore preview: {}", restore_error);
                Err(error)
            }
            (error, Ok(())) => Err(error),
        }
    }

    fn start_software(&self, options: &RecordingOptions) -> RecordingResult<Started> {
        let settings = SoftwareCaptureSettings {
            resolution: Resolution::new(self.config.fallback_width, self.config.fallback_height),
            fps: self.config.fallback_fps.min(options.fps).max(1),
            bitrate: self.config.fallback_bitrate,
        };
        let output_path = timestamped_output_path(
            &self.config.recordings_dir,
            &self.config.file_prefix,
            Utc::now(),
            self.software.output_extension(),
        );

        self.software.start(&output_path, settings)?;
        Ok(Started::software(RecordingSession::new(
            RecordingMode::Software,
            output_path,
        )))
    }

    fn fall_back(&self, reason: SoftwareReason, detail: &str) {
        let reason = if detail.is_empty() {
            reason.to_string()
        } else {
            format!("{}: {}", reason, detail)
        };
        tracing::warn!("Using software capture: {}", reason);
        let _ = self.event_tx.send(RecordingEvent::Fallback { reason });
    }
}

/// Report `error`, then make the slot available for a retry
fn fail_session(
    slot: &RwLock<SessionSlot>,
    event_tx: &broadcast::Sender<RecordingEvent>,
    error: &RecordingError,
) {
    {
        let mut slot = slot.write();
        if let Some(session) = slot.session.as_mut() {
            session.state = SessionState::Failed;
        }
        slot.state = SessionState::Failed;
    }
    let _ = event_tx.send(RecordingEvent::Failed {
        error: error.to_string(),
    });
    *slot.write() = SessionSlot::default();
}

/// Give the device back to the live preview
async fn restore_preview(preview: &dyn PreviewSurface) -> RecordingResult<()> {
    preview.set_recording_indicator(false);
    preview.acquire().await
}

/// Undoes a `start` whose future was dropped before it resolved
///
/// The slot stays `Stopping` until the encoder is stopped and the preview
/// has the device again, so no new start races the cleanup.
struct StartGuard {
    slot: SharedSlot,
    hardware: Arc<dyn HardwareRecorder>,
    preview: Arc<dyn PreviewSurface>,
    armed: bool,
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let preview_released = {
            let mut slot = self.slot.write();
            if slot.state != SessionState::Starting {
                return;
            }
            slot.state = SessionState::Stopping;
            slot.preview_released
        };
        tracing::warn!("Recording start abandoned before it finished");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            *self.slot.write() = SessionSlot::default();
            return;
        };
        let slot = self.slot.clone();
        let hardware = self.hardware.clone();
        let preview = self.preview.clone();
        runtime.spawn(async move {
            if hardware.is_live() {
                if let Err(e) = hardware.stop().await {
                    tracing::warn!("Failed to stop abandoned encoder: {}", e);
                }
            }
            if preview_released {
                if let Err(e) = restore_preview(preview.as_ref()).await {
                    tracing::warn!("Failed to restore preview: {}", e);
                }
            }
            *slot.write() = SessionSlot::default();
        });
    }
}
