//! Encoder command line construction
//!
//! Builder for the hardware encoder invocation. Two capture modes exist:
//! direct device capture (the encoder opens the camera itself) and raw-frame
//! stdin capture (the host streams RGBA frames).

use crate::encoder::probe::HardwareEncoder;
use std::path::{Path, PathBuf};

/// Pixel format of frames streamed in raw-frame mode
pub const RAW_PIXEL_FORMAT: &str = "rgba";

/// Where the encoder reads video from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    /// Encoder reads straight from the device node
    Device {
        device_path: String,
        audio_source: Option<String>,
    },
    /// Host writes raw frames to the encoder's stdin
    RawFrames,
}

impl CaptureInput {
    pub fn is_raw(&self) -> bool {
        matches!(self, CaptureInput::RawFrames)
    }

    /// Name of the capture device for messages
    pub fn device_label(&self) -> &str {
        match self {
            CaptureInput::Device { device_path, .. } => device_path,
            CaptureInput::RawFrames => "capture device",
        }
    }
}

/// Rate-control quality for a family; raw-frame mode trades quality for bandwidth
fn quality_level(encoder: HardwareEncoder, raw: bool) -> u32 {
    match (encoder, raw) {
        (HardwareEncoder::Nvenc, false) => 23,
        (HardwareEncoder::Nvenc, true) => 28,
        (HardwareEncoder::Vaapi, false) => 24,
        (HardwareEncoder::Vaapi, true) => 30,
        (HardwareEncoder::Qsv, false) => 23,
        (HardwareEncoder::Qsv, true) => 28,
    }
}

#[derive(Debug, Clone)]
pub struct EncoderCommandBuilder {
    encoder: HardwareEncoder,
    input: CaptureInput,
    width: u32,
    height: u32,
    fps: u32,
    device_input_format: String,
    vaapi_device: String,
    audio_bitrate: String,
    output_path: PathBuf,
}

impl EncoderCommandBuilder {
    pub fn new(encoder: HardwareEncoder, input: CaptureInput, output_path: &Path) -> Self {
        Self {
            encoder,
            input,
            width: 1920,
            height: 1080,
            fps: 30,
            device_input_format: "mjpeg".to_string(),
            vaapi_device: "/dev/dri/renderD128".to_string(),
            audio_bitrate: "192k".to_string(),
            output_path: output_path.to_path_buf(),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_framerate(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_vaapi_device(mut self, device: &str) -> Self {
        self.vaapi_device = device.to_string();
        self
    }

    pub fn with_device_input_format(mut self, format: &str) -> Self {
        self.device_input_format = format.to_string();
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
        let video_size = format!("{}x{}", self.width, self.height);

        if self.encoder == HardwareEncoder::Vaapi {
            args.extend(["-vaapi_device".into(), self.vaapi_device.clone()]);
        }

        let mut has_audio = false;
        match &self.input {
            CaptureInput::Device {
                device_path,
                audio_source,
            } => {
                args.extend([
                    "-f".into(),
                    "v4l2".into(),
                    "-thread_queue_size".into(),
                    "512".into(),
                    "-input_format".into(),
                    self.device_input_format.clone(),
                    "-video_size".into(),
                    video_size,
                    "-framerate".into(),
                    self.fps.to_string(),
                    "-i".into(),
                    device_path.clone(),
                ]);
                if let Some(source) = audio_source {
                    args.extend([
                        "-f".into(),
                        "pulse".into(),
                        "-thread_queue_size".into(),
                        "512".into(),
                        "-i".into(),
                        source.clone(),
                    ]);
                    has_audio = true;
                }
            }
            CaptureInput::RawFrames => {
                args.extend([
                    "-f".into(),
                    "rawvideo".into(),
                    "-pix_fmt".into(),
                    RAW_PIXEL_FORMAT.into(),
                    "-video_size".into(),
                    video_size,
                    "-framerate".into(),
                    self.fps.to_string(),
                    "-i".into(),
                    "-".into(),
                ]);
            }
        }

        args.extend(["-map".into(), "0:v".into()]);
        if has_audio {
            args.extend(["-map".into(), "1:a".into()]);
        }

        args.extend(self.video_codec_args());

        if has_audio {
            args.extend([
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                self.audio_bitrate.clone(),
            ]);
        }

        args.push(self.output_path.to_string_lossy().to_string());
        args
    }

    fn video_codec_args(&self) -> Vec<String> {
        let quality = quality_level(self.encoder, self.input.is_raw()).to_string();
        let codec = self.encoder.codec().to_string();

        match self.encoder {
            HardwareEncoder::Nvenc => vec![
                "-c:v".into(),
                codec,
                "-preset".into(),
                "p4".into(),
                "-rc".into(),
                "vbr".into(),
                "-cq".into(),
                quality,
                "-b:v".into(),
                "0".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
            ],
            HardwareEncoder::Vaapi => vec![
                "-vf".into(),
                "format=nv12,hwupload".into(),
                "-c:v".into(),
                codec,
                "-qp".into(),
                quality,
            ],
            HardwareEncoder::Qsv => vec![
                "-c:v".into(),
                codec,
                "-preset".into(),
                "veryfast".into(),
                "-global_quality".into(),
                quality,
                "-pix_fmt".into(),
                "nv12".into(),
            ],
        }
    }
}
