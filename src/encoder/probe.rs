//! Hardware encoder detection
//!
//! Runs `ffmpeg -hide_banner -encoders` once and records which hardware
//! encoder families the build offers. Any failure means "no hardware".

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Hardware encoder family, exactly one selected per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareEncoder {
    Nvenc,
    Vaapi,
    Qsv,
}

impl HardwareEncoder {
    /// Selection order when more than one family is available
    pub const PRIORITY: [HardwareEncoder; 3] =
        [HardwareEncoder::Nvenc, HardwareEncoder::Vaapi, HardwareEncoder::Qsv];

    /// FFmpeg encoder name
    pub fn codec(&self) -> &'static str {
        match self {
            HardwareEncoder::Nvenc => "h264_nvenc",
            HardwareEncoder::Vaapi => "h264_vaapi",
            HardwareEncoder::Qsv => "h264_qsv",
        }
    }
}

impl std::fmt::Display for HardwareEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareEncoder::Nvenc => write!(f, "nvenc"),
            HardwareEncoder::Vaapi => write!(f, "vaapi"),
            HardwareEncoder::Qsv => write!(f, "qsv"),
        }
    }
}

/// Snapshot of the hardware encoder families usable on this host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderCapabilities {
    pub has_nvenc: bool,
    pub has_vaapi: bool,
    pub has_qsv: bool,
}

impl EncoderCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn supports(&self, encoder: HardwareEncoder) -> bool {
        match encoder {
            HardwareEncoder::Nvenc => self.has_nvenc,
            HardwareEncoder::Vaapi => self.has_vaapi,
            HardwareEncoder::Qsv => self.has_qsv,
        }
    }

    /// First available family in priority order
    pub fn best(&self) -> Option<HardwareEncoder> {
        HardwareEncoder::PRIORITY
            .into_iter()
            .find(|e| self.supports(*e))
    }

    pub fn any(&self) -> bool {
        self.best().is_some()
    }
}

/// Parse the encoder listing for hardware family names
pub fn parse_encoder_list(output: &str) -> EncoderCapabilities {
    EncoderCapabilities {
        has_nvenc: output.contains(HardwareEncoder::Nvenc.codec()),
        has_vaapi: output.contains(HardwareEncoder::Vaapi.codec()),
        has_qsv: output.contains(HardwareEncoder::Qsv.codec()),
    }
}

/// Probes the encoder binary once per process lifetime
#[derive(Debug)]
pub struct EncoderProber {
    ffmpeg_path: PathBuf,
    timeout: Duration,
    cached: OnceCell<EncoderCapabilities>,
}

impl EncoderProber {
    pub fn new(ffmpeg_path: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg_path,
            timeout,
            cached: OnceCell::new(),
        }
    }

    /// Cached capabilities; the first call runs the probe
    pub async fn capabilities(&self) -> EncoderCapabilities {
        *self.cached.get_or_init(|| self.probe()).await
    }

    /// Run the encoder listing, all-false on any failure
    pub async fn probe(&self) -> EncoderCapabilities {
        let child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                tracing::info!("Encoder listing exited with {}; assuming no hardware encoders", output.status);
                return EncoderCapabilities::none();
            }
            Ok(Err(e)) => {
                tracing::info!("Encoder binary {:?} unavailable ({}); assuming no hardware encoders", self.ffmpeg_path, e);
                return EncoderCapabilities::none();
            }
            Err(_) => {
                tracing::info!("Encoder listing timed out after {:?}; assuming no hardware encoders", self.timeout);
                return EncoderCapabilities::none();
            }
        };

        let capabilities = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        tracing::info!(
            "Hardware encoders: nvenc={}, vaapi={}, qsv={}",
            capabilities.has_nvenc,
            capabilities.has_vaapi,
            capabilities.has_qsv
        );
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_qsv             H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (Intel Quick Sync Video acceleration) (codec h264)
 V....D h264_vaapi           H.264/AVC (VAAPI) (codec h264)
";

    #[test]
    fn test_parse_encoder_list() {
        let caps = parse_encoder_list(LISTING);
        assert!(!caps.has_nvenc);
        assert!(caps.has_vaapi);
        assert!(caps.has_qsv);
    }

    #[test]
    fn test_best_respects_priority() {
        let caps = EncoderCapabilities {
            has_nvenc: true,
            has_vaapi: true,
            has_qsv: true,
        };
        assert_eq!(caps.best(), Some(HardwareEncoder::Nvenc));

        let caps = parse_encoder_list(LISTING);
        assert_eq!(caps.best(), Some(HardwareEncoder::Vaapi));

        assert_eq!(EncoderCapabilities::none().best(), None);
        assert!(!EncoderCapabilities::none().any());
    }

    #[test]
    fn test_capabilities_serialization() {
        let json = serde_json::to_value(EncoderCapabilities {
            has_nvenc: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["hasNvenc"], true);
        assert_eq!(json["hasQsv"], false);
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_all_false() {
        let prober = EncoderProber::new(
            PathBuf::from("/nonexistent/ffmpeg"),
            Duration::from_secs(1),
        );
        assert_eq!(prober.capabilities().await, EncoderCapabilities::none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_parses_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let script = crate::test_support::write_script(
            dir.path(),
            "ffmpeg",
            &format!(
                "echo run >> '{}'\necho ' V....D h264_nvenc  NVIDIA NVENC H.264 encoder'\n",
                counter.display()
            ),
        );

        let prober = EncoderProber::new(script, Duration::from_secs(5));
        let first = prober.capabilities().await;
        let second = prober.capabilities().await;

        assert!(first.has_nvenc);
        assert_eq!(first, second);
        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }
}
