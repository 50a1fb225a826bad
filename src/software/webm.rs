//! WebM encoder backed by GStreamer
//!
//! Frames and samples are pushed through `appsrc` elements into a streamable
//! `webmmux`; the muxed bytes are collected from an `appsink` and handed back
//! as chunks.

use super::codec::{EncoderSettings, MediaEncoder, MediaEncoderFactory};
use crate::capture::traits::AudioFormat;
use crate::utils::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Duration;

/// How long `finish` waits for the muxer to drain
const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// GStreamer encoders producing one WebM codec combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebmElements {
    pub video: &'static str,
    pub audio: Option<&'static str>,
}

/// Encoders for a `video/webm` mime type
///
/// Without a codecs parameter VP8 and Opus are used. Codecs the WebM muxer
/// cannot carry yield `None`.
pub fn webm_elements(mime_type: &str) -> Option<WebmElements> {
    let mut parts = mime_type.split(';').map(str::trim);
    if parts.next()? != "video/webm" {
        return None;
    }
    let Some(codecs) = parts.find_map(|p| p.strip_prefix("codecs=")) else {
        return Some(WebmElements {
            video: "vp8enc",
            audio: Some("opusenc"),
        });
    };

    let mut video = None;
    let mut audio = None;
    for codec in codecs.trim_matches('"').split(',').map(str::trim) {
        match codec {
            "vp8" => video = Some("vp8enc"),
            "vp9" => video = Some("vp9enc"),
            "opus" => audio = Some("opusenc"),
            _ => return None,
        }
    }
    Some(WebmElements {
        video: video?,
        audio,
    })
}

/// Creates GStreamer WebM encoders
pub struct WebmEncoderFactory;

impl WebmEncoderFactory {
    pub fn new() -> RecordingResult<Self> {
        gst::init()
            .map_err(|e| RecordingError::Encoding(format!("GStreamer init failed: {}", e)))?;
        Ok(Self)
    }
}

fn element_available(name: &str) -> bool {
    gst::ElementFactory::find(name).is_some()
}

impl MediaEncoderFactory for WebmEncoderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        let Some(elements) = webm_elements(mime_type) else {
            return false;
        };
        let audio_chain = elements
            .audio
            .into_iter()
            .chain(elements.audio.map(|_| "audioconvert"))
            .chain(elements.audio.map(|_| "audioresample"));
        ["webmmux", "videoconvert", elements.video]
            .into_iter()
            .chain(audio_chain)
            .all(element_available)
    }

    fn create(&self, settings: &EncoderSettings) -> RecordingResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(WebmEncoder::new(settings)?))
    }
}

/// One running encode pipeline
pub struct WebmEncoder {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: Option<(gst_app::AppSrc, AudioFormat)>,
    sink: gst_app::AppSink,
    frame_duration: gst::ClockTime,
}

fn make(name: &str) -> RecordingResult<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| RecordingError::Encoding(format!("Failed to create {}: {}", name, e)))
}

fn link_error(e: impl std::fmt::Display) -> RecordingError {
    RecordingError::Encoding(format!("Failed to build encoder pipeline: {}", e))
}

fn caps_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}

impl WebmEncoder {
    pub fn new(settings: &EncoderSettings) -> RecordingResult<Self> {
        let elements = webm_elements(&settings.mime_type).ok_or_else(|| {
            RecordingError::Encoding(format!("Unsupported mime type {}", settings.mime_type))
        })?;
        let pipeline = gst::Pipeline::new();

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", caps_int(settings.resolution.width))
            .field("height", caps_int(settings.resolution.height))
            .field("framerate", gst::Fraction::new(caps_int(settings.fps), 1))
            .build();
        let video_src = gst_app::AppSrc::builder()
            .name("video")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let convert = make("videoconvert")?;
        // Realtime deadline; the default "best" cannot keep up with live input.
        let encoder = gst::ElementFactory::make(elements.video)
            .property("deadline", 1i64)
            .property("target-bitrate", caps_int(settings.bitrate))
            .build()
            .map_err(|e| {
                RecordingError::Encoding(format!("Failed to create {}: {}", elements.video, e))
            })?;
        let mux = gst::ElementFactory::make("webmmux")
            .property("streamable", true)
            .build()
            .map_err(|e| RecordingError::Encoding(format!("Failed to create webmmux: {}", e)))?;
        let sink = gst_app::AppSink::builder().name("out").sync(false).build();

        let chain = [video_src.upcast_ref(), &convert, &encoder, &mux, sink.upcast_ref()];
        pipeline.add_many(chain).map_err(link_error)?;
        gst::Element::link_many(chain).map_err(link_error)?;

        let audio_src = match (settings.audio, elements.audio) {
            (Some(format), Some(audio_encoder)) => {
                Some((add_audio_branch(&pipeline, &mux, format, audio_encoder)?, format))
            }
            (Some(_), None) => {
                tracing::info!("{} carries no audio, recording video only", settings.mime_type);
                None
            }
            (None, _) => None,
        };

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            RecordingError::Encoding(format!("Encoder pipeline did not start: {:?}", e))
        })?;
        tracing::debug!(
            "WebM encoder running: {}x{} @ {} fps, {} bps, audio: {}",
            settings.resolution.width,
            settings.resolution.height,
            settings.fps,
            settings.bitrate,
            audio_src.is_some()
        );

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            sink,
            frame_duration: clock_time(Duration::from_secs(1) / settings.fps.max(1)),
        })
    }

    /// Fail with the first error the pipeline has posted, if any
    fn check_bus(&self) -> RecordingResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        match bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(message) => match message.view() {
                gst::MessageView::Error(err) => Err(RecordingError::Encoding(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug()
                ))),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Muxed bytes produced so far
    fn drain(&self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(sample) = self.sink.try_pull_sample(gst::ClockTime::ZERO) {
            if let Some(buffer) = sample.buffer() {
                if let Ok(map) = buffer.map_readable() {
                    out.extend_from_slice(map.as_slice());
                }
            }
        }
        out
    }
}

fn add_audio_branch(
    pipeline: &gst::Pipeline,
    mux: &gst::Element,
    format: AudioFormat,
    audio_encoder: &str,
) -> RecordingResult<gst_app::AppSrc> {
    let caps = gst::Caps::builder("audio/x-raw")
        .field("format", "S16LE")
        .field("layout", "interleaved")
        .field("rate", caps_int(format.sample_rate))
        .field("channels", caps_int(format.channels))
        .build();
    let audio_src = gst_app::AppSrc::builder()
        .name("audio")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .build();
    let convert = make("audioconvert")?;
    let resample = make("audioresample")?;
    let encoder = make(audio_encoder)?;

    let chain = [audio_src.upcast_ref(), &convert, &resample, &encoder];
    pipeline.add_many(chain).map_err(link_error)?;
    gst::Element::link_many(chain).map_err(link_error)?;
    encoder.link(mux).map_err(link_error)?;
    Ok(audio_src)
}

fn push(
    src: &gst_app::AppSrc,
    data: Vec<u8>,
    timestamp: Duration,
    duration: gst::ClockTime,
) -> RecordingResult<()> {
    let mut buffer = gst::Buffer::from_slice(data);
    if let Some(buffer) = buffer.get_mut() {
        buffer.set_pts(clock_time(timestamp));
        buffer.set_duration(duration);
    }
    src.push_buffer(buffer)
        .map(|_| ())
        .map_err(|e| RecordingError::Encoding(format!("{} rejected a buffer: {:?}", src.name(), e)))
}

fn wait_for_eos(bus: Option<gst::Bus>) -> RecordingResult<()> {
    let Some(bus) = bus else {
        return Ok(());
    };
    for message in bus.iter_timed(clock_time(FINISH_TIMEOUT)) {
        match message.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(RecordingError::Encoding(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug()
                )))
            }
            _ => {}
        }
    }
    Err(RecordingError::Encoding(
        "encoder did not finish writing in time".to_string(),
    ))
}

#[async_trait]
impl MediaEncoder for WebmEncoder {
    async fn encode(&mut self, frame: &[u8], timestamp: Duration) -> RecordingResult<Vec<u8>> {
        self.check_bus()?;
        push(&self.video_src, frame.to_vec(), timestamp, self.frame_duration)?;
        Ok(self.drain())
    }

    async fn encode_audio(
        &mut self,
        samples: &[i16],
        timestamp: Duration,
    ) -> RecordingResult<Vec<u8>> {
        let Some((audio_src, format)) = &self.audio_src else {
            return Ok(Vec::new());
        };
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        push(audio_src, bytes, timestamp, clock_time(format.duration_of(samples.len())))?;
        Ok(self.drain())
    }

    async fn finish(&mut self) -> RecordingResult<Vec<u8>> {
        if let Err(e) = self.video_src.end_of_stream() {
            tracing::debug!("Video end of stream not accepted: {:?}", e);
        }
        if let Some((audio_src, _)) = &self.audio_src {
            if let Err(e) = audio_src.end_of_stream() {
                tracing::debug!("Audio end of stream not accepted: {:?}", e);
            }
        }

        let bus = self.pipeline.bus();
        let finished = tokio::task::spawn_blocking(move || wait_for_eos(bus))
            .await
            .map_err(|e| RecordingError::Encoding(format!("Encoder drain task failed: {}", e)))?;
        let data = self.drain();
        let _ = self.pipeline.set_state(gst::State::Null);
        finished.map(|()| data)
    }
}

impl Drop for WebmEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
