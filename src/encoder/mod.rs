//! Hardware encoder module
//!
//! - `probe`: which hardware encoder families the host offers
//! - `args`: per-family encoder command lines
//! - `monitor`: encoder diagnostic output filtering
//! - `process`: the encoder child process lifecycle

pub mod args;
pub mod monitor;
pub mod probe;
pub mod process;

pub use args::CaptureInput;
pub use probe::{EncoderCapabilities, EncoderProber, HardwareEncoder};
pub use process::{EncoderProcessManager, EncoderSession, HardwareRequest, ProcessExit};
