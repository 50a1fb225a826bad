//! Collaborator interfaces of the orchestrator
//!
//! The orchestrator only talks to the prober, the resolver and the encoder
//! process manager through these traits.

use crate::capture::devices::DeviceResolver;
use crate::encoder::probe::{EncoderCapabilities, EncoderProber};
use crate::encoder::process::{EncoderProcessManager, EncoderSession, HardwareRequest};
use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use std::path::PathBuf;

/// Source of the host's hardware encoder capabilities
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn capabilities(&self) -> EncoderCapabilities;
}

/// Best-effort device name lookups
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn resolve_video_device(&self, name_hint: &str) -> Option<String>;

    async fn resolve_audio_device(&self, name_hint: &str) -> Option<String>;
}

/// Owner of the external encoder process
///
/// Callers never hold the process itself; they only start, feed and stop it
/// through this interface.
#[async_trait]
pub trait HardwareRecorder: Send + Sync {
    /// Spawn the encoder, returning the path it writes and its exit signal
    ///
    /// The exit signal fires for every exit, including the one `stop` causes.
    async fn start(&self, request: &HardwareRequest) -> RecordingResult<EncoderSession>;

    /// Feed one raw frame; false when no process accepts input
    async fn write_frame(&self, bytes: &[u8]) -> bool;

    /// Interrupt the encoder and wait for it to exit
    async fn stop(&self) -> RecordingResult<PathBuf>;

    fn is_live(&self) -> bool;
}

#[async_trait]
impl CapabilitySource for EncoderProber {
    async fn capabilities(&self) -> EncoderCapabilities {
        EncoderProber::capabilities(self).await
    }
}

#[async_trait]
impl DeviceLookup for DeviceResolver {
    async fn resolve_video_device(&self, name_hint: &str) -> Option<String> {
        DeviceResolver::resolve_video_device(self, name_hint).await
    }

    async fn resolve_audio_device(&self, name_hint: &str) -> Option<String> {
        DeviceResolver::resolve_audio_device(self, name_hint).await
    }
}

#[async_trait]
impl HardwareRecorder for EncoderProcessManager {
    async fn start(&self, request: &HardwareRequest) -> RecordingResult<EncoderSession> {
        EncoderProcessManager::start(self, request).await
    }

    async fn write_frame(&self, bytes: &[u8]) -> bool {
        EncoderProcessManager::write_frame(self, bytes).await
    }

    async fn stop(&self) -> RecordingResult<PathBuf> {
        EncoderProcessManager::stop(self).await
    }

    fn is_live(&self) -> bool {
        EncoderProcessManager::is_live(self)
    }
}
