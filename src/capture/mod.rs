//! Capture devices and the live preview
//!
//! This module resolves camera and microphone devices and describes the
//! preview surface owned by the host application.

#[cfg(feature = "gstreamer")]
pub mod camera;
pub mod devices;
pub mod traits;

#[cfg(feature = "gstreamer")]
pub use camera::CameraPreview;
pub use devices::DeviceResolver;
pub use traits::{
    AudioChunk, AudioFormat, AudioSourceInfo, PreviewSurface, Resolution, VideoDeviceInfo,
    VideoFrame,
};
