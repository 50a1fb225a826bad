//! Software capture fallback
//!
//! Used when no hardware encoder path is usable. Frames come from the live
//! preview and are encoded in-process.

pub mod canvas;
pub mod capture;
pub mod codec;
#[cfg(feature = "gstreamer")]
pub mod webm;

pub use capture::{SoftwareCapture, SoftwareCaptureSettings};
pub use codec::{EncoderSettings, MediaEncoder, MediaEncoderFactory};
#[cfg(feature = "gstreamer")]
pub use webm::WebmEncoderFactory;
