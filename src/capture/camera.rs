//! Live camera preview backed by GStreamer
//!
//! Holds the capture device open while no hardware recording needs it, keeps
//! the newest frame around for the software path and buffers the microphone
//! track next to it.

use super::traits::{AudioChunk, AudioFormat, PreviewSurface, VideoFrame};
use crate::utils::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Format the audio branch converts the microphone to
pub const PREVIEW_AUDIO: AudioFormat = AudioFormat {
    sample_rate: 48_000,
    channels: 2,
};

/// How long the device may take to start streaming
const START_TIMEOUT_SECS: u64 = 5;

fn video_description(device: &str) -> String {
    format!(
        "v4l2src device=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! \
         appsink name=frames max-buffers=1 drop=true sync=false",
        device
    )
}

fn audio_description(source: &str) -> String {
    format!(
        "pulsesrc device=\"{}\" ! audioconvert ! audioresample ! \
         audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! \
         appsink name=samples max-buffers=200 drop=true sync=false",
        source, PREVIEW_AUDIO.sample_rate, PREVIEW_AUDIO.channels
    )
}

/// Copy `height` rows of `width` RGBA pixels out of a padded buffer
pub(crate) fn pack_rgba(data: &[u8], width: u32, height: u32, stride: usize) -> Option<Vec<u8>> {
    let row = width as usize * 4;
    let rows = height as usize;
    if stride < row {
        return None;
    }
    if rows == 0 {
        return Some(Vec::new());
    }
    if data.len() < stride * (rows - 1) + row {
        return None;
    }
    if stride == row {
        return Some(data[..row * rows].to_vec());
    }

    let mut packed = Vec::with_capacity(row * rows);
    for line in data.chunks(stride).take(rows) {
        packed.extend_from_slice(&line[..row]);
    }
    Some(packed)
}

pub(crate) fn samples_from_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn frame_from_sample(sample: &gst::Sample) -> Option<(VideoFrame, Option<u32>)> {
    let info = VideoInfo::from_caps(sample.caps()?).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let stride = usize::try_from(*info.stride().first()?).ok()?;
    let data = pack_rgba(map.as_slice(), info.width(), info.height(), stride)?;

    let rate = info.fps();
    let fps = if rate.numer() > 0 && rate.denom() > 0 {
        u32::try_from((rate.numer() + rate.denom() / 2) / rate.denom()).ok()
    } else {
        None
    };
    Some((
        VideoFrame {
            width: info.width(),
            height: info.height(),
            data,
        },
        fps,
    ))
}

fn launch(description: &str, sink_name: &str) -> RecordingResult<(gst::Pipeline, gst_app::AppSink)> {
    let pipeline = gst::parse::launch(description)
        .map_err(|e| RecordingError::Preview(format!("{}: {}", description, e)))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| RecordingError::Preview("launch line is not a pipeline".to_string()))?;
    let sink = pipeline
        .by_name(sink_name)
        .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
        .ok_or_else(|| RecordingError::Preview(format!("no appsink named {}", sink_name)))?;
    Ok((pipeline, sink))
}

/// Bring `pipeline` to playing, reporting a device held elsewhere as a conflict
fn play(pipeline: &gst::Pipeline, device: &str) -> RecordingResult<()> {
    let started = pipeline.set_state(gst::State::Playing);
    let (settled, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(START_TIMEOUT_SECS)));

    let error = pipeline
        .bus()
        .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]));
    let failure = match error.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) if err.error().matches(gst::ResourceError::Busy) => {
            Some(RecordingError::DeviceConflict(device.to_string()))
        }
        Some(gst::MessageView::Error(err)) => {
            Some(RecordingError::Preview(format!("{}: {}", device, err.error())))
        }
        _ if started.is_err() || settled.is_err() => Some(RecordingError::Preview(format!(
            "{} did not start streaming",
            device
        ))),
        _ => None,
    };

    match failure {
        Some(error) => {
            let _ = pipeline.set_state(gst::State::Null);
            Err(error)
        }
        None => Ok(()),
    }
}

struct PreviewPipelines {
    video: gst::Pipeline,
    frames: gst_app::AppSink,
    audio: Option<(gst::Pipeline, gst_app::AppSink)>,
}

impl PreviewPipelines {
    fn start(video_device: &str, audio_source: Option<&str>) -> RecordingResult<Self> {
        let (video, frames) = launch(&video_description(video_device), "frames")?;
        play(&video, video_device)?;

        let audio = audio_source.and_then(|source| {
            let started = launch(&audio_description(source), "samples")
                .and_then(|(pipeline, sink)| play(&pipeline, source).map(|()| (pipeline, sink)));
            match started {
                Ok(audio) => Some(audio),
                Err(e) => {
                    tracing::warn!("Microphone unavailable, preview is video only: {}", e);
                    None
                }
            }
        });
        Ok(Self {
            video,
            frames,
            audio,
        })
    }

    fn stop(&self) -> RecordingResult<()> {
        if let Some((audio, _)) = &self.audio {
            let _ = audio.set_state(gst::State::Null);
        }
        self.video
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| RecordingError::Preview(format!("camera did not stop: {:?}", e)))
    }
}

impl Drop for PreviewPipelines {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Preview of one camera and, optionally, one microphone
pub struct CameraPreview {
    video_device: String,
    audio_source: Option<String>,
    pipelines: Mutex<Option<PreviewPipelines>>,
    last_frame: Mutex<Option<VideoFrame>>,
    fps: Mutex<Option<u32>>,
    recording: AtomicBool,
}

impl CameraPreview {
    pub fn new(video_device: impl Into<String>, audio_source: Option<String>) -> RecordingResult<Self> {
        gst::init().map_err(|e| RecordingError::Preview(format!("GStreamer init failed: {}", e)))?;
        Ok(Self {
            video_device: video_device.into(),
            audio_source,
            pipelines: Mutex::new(None),
            last_frame: Mutex::new(None),
            fps: Mutex::new(None),
            recording: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.pipelines.lock().is_some()
    }
}

#[async_trait]
impl PreviewSurface for CameraPreview {
    async fn release(&self) -> RecordingResult<()> {
        let Some(pipelines) = self.pipelines.lock().take() else {
            return Ok(());
        };
        *self.last_frame.lock() = None;
        if let Err(e) = pipelines.stop() {
            *self.pipelines.lock() = Some(pipelines);
            return Err(e);
        }
        tracing::info!("Preview released {}", self.video_device);
        Ok(())
    }

    async fn acquire(&self) -> RecordingResult<()> {
        if self.is_running() {
            return Ok(());
        }
        let video_device = self.video_device.clone();
        let audio_source = self.audio_source.clone();
        let pipelines = tokio::task::spawn_blocking(move || {
            PreviewPipelines::start(&video_device, audio_source.as_deref())
        })
        .await
        .map_err(|e| RecordingError::Preview(format!("preview start task failed: {}", e)))??;

        let mut slot = self.pipelines.lock();
        if slot.is_none() {
            *slot = Some(pipelines);
            tracing::info!("Preview streaming from {}", self.video_device);
        }
        Ok(())
    }

    fn set_recording_indicator(&self, visible: bool) {
        if self.recording.swap(visible, Ordering::SeqCst) != visible {
            tracing::info!("Recording indicator {}", if visible { "on" } else { "off" });
        }
    }

    fn negotiated_fps(&self) -> Option<u32> {
        *self.fps.lock()
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        let sample = self
            .pipelines
            .lock()
            .as_ref()
            .and_then(|p| p.frames.try_pull_sample(gst::ClockTime::ZERO));
        if let Some(sample) = sample {
            match frame_from_sample(&sample) {
                Some((frame, fps)) => {
                    if fps.is_some() {
                        *self.fps.lock() = fps;
                    }
                    *self.last_frame.lock() = Some(frame);
                }
                None => tracing::debug!("Skipped unreadable preview frame"),
            }
        }
        self.last_frame.lock().clone()
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.pipelines
            .lock()
            .as_ref()
            .and_then(|p| p.audio.as_ref())
            .map(|_| PREVIEW_AUDIO)
    }

    fn take_audio(&self) -> Vec<AudioChunk> {
        let pipelines = self.pipelines.lock();
        let Some((_, samples)) = pipelines.as_ref().and_then(|p| p.audio.as_ref()) else {
            return Vec::new();
        };
        std::iter::from_fn(|| samples.try_pull_sample(gst::ClockTime::ZERO))
            .filter_map(|sample| {
                let buffer = sample.buffer()?;
                let map = buffer.map_readable().ok()?;
                Some(AudioChunk {
                    samples: samples_from_le(map.as_slice()),
                })
            })
            .collect()
    }
}
