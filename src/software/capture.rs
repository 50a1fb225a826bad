//! Software capture path
//!
//! Samples the live preview onto a fixed-size canvas, feeds an in-process
//! encoder along with the preview's audio track and keeps every encoded chunk
//! in memory until stop, when the complete recording is written in one go.

use crate::capture::traits::{AudioFormat, PreviewSurface, Resolution};
use crate::software::canvas::FrameCanvas;
use crate::software::codec::{
    extension_for, select_mime_type, EncoderSettings, MediaEncoder, MediaEncoderFactory,
    CHUNK_TIMESLICE,
};
use crate::utils::error::{RecordingError, RecordingResult};
use crate::utils::paths::verify_output_file;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Parameters of a software capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareCaptureSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub bitrate: u32,
}

/// Decides whether a cadence tick produces a frame
///
/// A tick closer than one frame interval to the previous sample is dropped
/// instead of being queued for catch-up.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    last_sample: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            last_sample: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn should_sample(&mut self, now: Instant) -> bool {
        match self.last_sample {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_sample = Some(now);
                true
            }
        }
    }
}

/// What the sampling task hands back once cancelled
struct CaptureOutput {
    chunks: Vec<Vec<u8>>,
    frames: u64,
    dropped: u64,
    audio_samples: usize,
    error: Option<RecordingError>,
}

struct ActiveCapture {
    output_path: PathBuf,
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<CaptureOutput>,
}

/// In-process fallback recorder
pub struct SoftwareCapture {
    factory: Arc<dyn MediaEncoderFactory>,
    preview: Arc<dyn PreviewSurface>,
    active: Mutex<Option<ActiveCapture>>,
}

impl SoftwareCapture {
    pub fn new(factory: Arc<dyn MediaEncoderFactory>, preview: Arc<dyn PreviewSurface>) -> Self {
        Self {
            factory,
            preview,
            active: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Extension of the file `start` would produce with this runtime
    pub fn output_extension(&self) -> &'static str {
        extension_for(select_mime_type(self.factory.as_ref()))
    }

    /// Begin sampling the preview; the file at `output_path` is written on stop
    pub fn start(
        &self,
        output_path: &Path,
        settings: SoftwareCaptureSettings,
    ) -> RecordingResult<()> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let mime_type = select_mime_type(self.factory.as_ref());
        let audio = self.preview.audio_format();
        let encoder_settings = EncoderSettings {
            mime_type: mime_type.to_string(),
            resolution: settings.resolution,
            fps: settings.fps,
            bitrate: settings.bitrate,
            timeslice: CHUNK_TIMESLICE,
            audio,
        };
        let encoder = self.factory.create(&encoder_settings)?;

        match audio {
            Some(format) => tracing::info!(
                "Software capture at {} {}fps using {} ({} bps), audio {} Hz x{}",
                settings.resolution,
                settings.fps,
                mime_type,
                settings.bitrate,
                format.sample_rate,
                format.channels
            ),
            None => tracing::info!(
                "Software capture at {} {}fps using {} ({} bps), no audio track",
                settings.resolution,
                settings.fps,
                mime_type,
                settings.bitrate
            ),
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(sample_loop(
            self.preview.clone(),
            encoder,
            FrameCanvas::new(settings.resolution),
            FramePacer::new(settings.fps),
            audio,
            cancel_rx,
        ));

        *slot = Some(ActiveCapture {
            output_path: output_path.to_path_buf(),
            cancel_tx,
            task,
        });
        Ok(())
    }

    /// Cancel sampling, finalize the encoder and write the recording
    pub async fn stop(&self) -> RecordingResult<PathBuf> {
        let active = self.active.lock().take().ok_or(RecordingError::NotRecording)?;

        // The loop finalizes the encoder only after it has left the sampling
        // loop, so no frame is drawn once finishing has begun.
        let _ = active.cancel_tx.send(());
        let output = active
            .task
            .await
            .map_err(|e| RecordingError::Encoding(format!("capture task failed: {}", e)))?;

        if let Some(error) = output.error {
            tracing::error!("Software encoder failed: {}", error);
            return Err(error);
        }

        let data = output.chunks.concat();
        if let Some(parent) = active.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&active.output_path, &data).await?;
        verify_output_file(&active.output_path).await?;

        tracing::info!(
            "Software capture wrote {} bytes ({} frames, {} dropped, {} audio samples) to {:?}",
            data.len(),
            output.frames,
            output.dropped,
            output.audio_samples,
            active.output_path
        );
        Ok(active.output_path)
    }
}

async fn sample_loop(
    preview: Arc<dyn PreviewSurface>,
    mut encoder: Box<dyn MediaEncoder>,
    mut canvas: FrameCanvas,
    mut pacer: FramePacer,
    audio: Option<AudioFormat>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> CaptureOutput {
    let mut output = CaptureOutput {
        chunks: Vec::new(),
        frames: 0,
        dropped: 0,
        audio_samples: 0,
        error: None,
    };
    if audio.is_some() {
        // Audio buffered before the session started is not part of it.
        preview.take_audio();
    }
    let started = Instant::now();
    let mut ticker = tokio::time::interval(pacer.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let tick = tokio::select! {
            biased;
            _ = &mut cancel_rx => break,
            tick = ticker.tick() => tick,
        };

        if let Some(format) = audio {
            for chunk in preview.take_audio() {
                if chunk.samples.is_empty() {
                    continue;
                }
                let timestamp = format.duration_of(output.audio_samples);
                output.audio_samples += chunk.samples.len();
                match encoder.encode_audio(&chunk.samples, timestamp).await {
                    Ok(data) if !data.is_empty() => output.chunks.push(data),
                    Ok(_) => {}
                    Err(e) => {
                        output.error = Some(e);
                        return output;
                    }
                }
            }
        }

        if !pacer.should_sample(tick) {
            output.dropped += 1;
            continue;
        }

        let Some(frame) = preview.latest_frame() else {
            continue;
        };
        if let Err(e) = canvas.draw(&frame) {
            tracing::debug!("Skipping preview frame: {}", e);
            output.dropped += 1;
            continue;
        }

        match encoder.encode(canvas.pixels(), tick.saturating_duration_since(started)).await {
            Ok(chunk) => {
                output.frames += 1;
                if !chunk.is_empty() {
                    output.chunks.push(chunk);
                }
            }
            Err(e) => {
                output.error = Some(e);
                return output;
            }
        }
    }

    match encoder.finish().await {
        Ok(tail) if !tail.is_empty() => output.chunks.push(tail),
        Ok(_) => {}
        Err(e) => output.error = Some(e),
    }
    output
}
