//! Recording system module
//!
//! This module implements the recording lifecycle:
//! - Collaborator traits for capability probing, device lookup and the encoder process
//! - Capture path decision table
//! - RecordingOrchestrator owning the single session

pub mod channel;
pub mod coordinator;
pub mod decision;
pub mod state;

pub use channel::{CapabilitySource, DeviceLookup, HardwareRecorder};
pub use coordinator::{RecordingEvent, RecordingOrchestrator};
pub use decision::{choose_capture_path, CapturePath, DeviceHandle};
pub use state::{RecordingMode, RecordingOptions, RecordingSession, RecordingStatus, SessionState};
