//! Capture path selection
//!
//! A pure function of the capability snapshot and the device lookup outcome,
//! evaluated once per start.

use crate::encoder::probe::{EncoderCapabilities, HardwareEncoder};

/// Device lookup outcome for one recording attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceHandle {
    pub video_device_path: Option<String>,
    pub audio_source_name: Option<String>,
}

/// Why the software path was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareReason {
    HardwareNotPreferred,
    NoHardwareEncoder,
    DeviceUnresolved,
    SpawnFailed,
}

impl std::fmt::Display for SoftwareReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftwareReason::HardwareNotPreferred => write!(f, "hardware capture not requested"),
            SoftwareReason::NoHardwareEncoder => write!(f, "no hardware encoder available"),
            SoftwareReason::DeviceUnresolved => write!(f, "video device not found"),
            SoftwareReason::SpawnFailed => write!(f, "hardware encoder failed to start"),
        }
    }
}

/// The chosen way to record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePath {
    /// Encoder process opens the device itself
    HardwareDirect {
        encoder: HardwareEncoder,
        device_path: String,
        audio_source: Option<String>,
    },
    /// Host streams raw frames to the encoder process
    HardwareRaw { encoder: HardwareEncoder },
    /// In-process canvas capture
    Software { reason: SoftwareReason },
}

/// Select the capture path
///
/// | hardware preferred | encoder family | video device | raw allowed | path            |
/// |--------------------|----------------|--------------|-------------|-----------------|
/// | no                 | any            | any          | any         | software        |
/// | yes                | none           | any          | any         | software        |
/// | yes                | best available | resolved     | any         | hardware direct |
/// | yes                | best available | unresolved   | no          | software        |
/// | yes                | best available | unresolved   | yes         | hardware raw    |
///
/// A missing audio source never changes the outcome; direct capture then
/// records video only.
pub fn choose_capture_path(
    capabilities: &EncoderCapabilities,
    prefer_hardware: bool,
    device: &DeviceHandle,
    allow_raw_frames: bool,
) -> CapturePath {
    if !prefer_hardware {
        return CapturePath::Software {
            reason: SoftwareReason::HardwareNotPreferred,
        };
    }

    let Some(encoder) = capabilities.best() else {
        return CapturePath::Software {
            reason: SoftwareReason::NoHardwareEncoder,
        };
    };

    match &device.video_device_path {
        Some(device_path) => CapturePath::HardwareDirect {
            encoder,
            device_path: device_path.clone(),
            audio_source: device.audio_source_name.clone(),
        },
        None if allow_raw_frames => CapturePath::HardwareRaw { encoder },
        None => CapturePath::Software {
            reason: SoftwareReason::DeviceUnresolved,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(nvenc: bool, vaapi: bool, qsv: bool) -> EncoderCapabilities {
        EncoderCapabilities {
            has_nvenc: nvenc,
            has_vaapi: vaapi,
            has_qsv: qsv,
        }
    }

    fn resolved(path: &str) -> DeviceHandle {
        DeviceHandle {
            video_device_path: Some(path.to_string()),
            audio_source_name: None,
        }
    }

    #[test]
    fn test_no_encoder_always_software() {
        for device in [DeviceHandle::default(), resolved("/dev/video2")] {
            for allow_raw in [false, true] {
                assert_eq!(
                    choose_capture_path(&caps(false, false, false), true, &device, allow_raw),
                    CapturePath::Software {
                        reason: SoftwareReason::NoHardwareEncoder
                    }
                );
            }
        }
    }

    #[test]
    fn test_unresolved_device_is_software_by_default() {
        assert_eq!(
            choose_capture_path(&caps(true, false, false), true, &DeviceHandle::default(), false),
            CapturePath::Software {
                reason: SoftwareReason::DeviceUnresolved
            }
        );
    }

    #[test]
    fn test_unresolved_device_with_raw_frames_allowed() {
        assert_eq!(
            choose_capture_path(&caps(false, false, true), true, &DeviceHandle::default(), true),
            CapturePath::HardwareRaw {
                encoder: HardwareEncoder::Qsv
            }
        );
    }

    #[test]
    fn test_every_capable_combination_picks_priority_encoder() {
        for bits in 1u8..8 {
            let caps = caps(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let expected = HardwareEncoder::PRIORITY
                .into_iter()
                .find(|e| caps.supports(*e))
                .unwrap();

            match choose_capture_path(&caps, true, &resolved("/dev/video2"), false) {
                CapturePath::HardwareDirect {
                    encoder,
                    device_path,
                    audio_source,
                } => {
                    assert_eq!(encoder, expected);
                    assert_eq!(device_path, "/dev/video2");
                    assert_eq!(audio_source, None);
                }
                other => panic!("expected hardware path, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_not_preferred_skips_hardware() {
        assert_eq!(
            choose_capture_path(&caps(true, true, true), false, &resolved("/dev/video0"), true),
            CapturePath::Software {
                reason: SoftwareReason::HardwareNotPreferred
            }
        );
    }

    #[test]
    fn test_audio_source_is_carried_through() {
        let device = DeviceHandle {
            video_device_path: Some("/dev/video2".to_string()),
            audio_source_name: Some("alsa_input.usb-OBSBOT_Tiny".to_string()),
        };
        assert!(matches!(
            choose_capture_path(&caps(false, true, false), true, &device, false),
            CapturePath::HardwareDirect {
                encoder: HardwareEncoder::Vaapi,
                audio_source: Some(_),
                ..
            }
        ));
    }
}
