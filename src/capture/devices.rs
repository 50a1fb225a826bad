//! Capture device resolution
//!
//! Maps a human-readable camera name to a capturable video device node and an
//! audio source name. Both lookups are best effort: any failure or missing
//! match yields `None` so the caller can fall back.

use crate::capture::traits::{AudioSourceInfo, VideoDeviceInfo};
use crate::config::RecorderConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Resolves device paths from the video device-class registry and the
/// audio-source lister
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    audio_lister: PathBuf,
    timeout: Duration,
}

impl DeviceResolver {
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            sysfs_root: config.sysfs_video_root.clone(),
            dev_root: config.dev_root.clone(),
            audio_lister: config.audio_lister_path.clone(),
            timeout: config.probe_timeout(),
        }
    }

    /// Enumerate video nodes, lowest device number first
    pub async fn list_video_devices(&self) -> Vec<VideoDeviceInfo> {
        let mut entries = match tokio::fs::read_dir(&self.sysfs_root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot read {:?}: {}", self.sysfs_root, e);
                return Vec::new();
            }
        };

        let mut devices = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let node = entry.file_name().to_string_lossy().to_string();
            let Some(number) = video_node_number(&node) else {
                continue;
            };

            let class_dir = entry.path();
            let name = read_attribute(&class_dir.join("name"))
                .await
                .unwrap_or_else(|| node.clone());
            // UVC cameras expose a metadata node next to the capture node;
            // only index 0 carries frames.
            let is_capture = read_attribute(&class_dir.join("index"))
                .await
                .and_then(|i| i.parse::<u32>().ok())
                .map(|i| i == 0)
                .unwrap_or(true);

            devices.push(VideoDeviceInfo {
                path: self.dev_root.join(&node).to_string_lossy().to_string(),
                name,
                number,
                is_capture,
            });
        }

        devices.sort_by_key(|d| d.number);
        devices
    }

    /// Find the first capture node whose display name matches `name_hint`
    pub async fn resolve_video_device(&self, name_hint: &str) -> Option<String> {
        let terms = search_terms(name_hint);
        if terms.is_empty() {
            return None;
        }

        let found = self
            .list_video_devices()
            .await
            .into_iter()
            .filter(|d| d.is_capture)
            .find(|d| name_matches(&d.name, &terms));

        match &found {
            Some(device) => tracing::info!(
                "Resolved video device {} ({}) for '{}'",
                device.path,
                device.name,
                name_hint
            ),
            None => tracing::debug!("No video device matches '{}'", name_hint),
        }

        found.map(|d| d.path)
    }

    /// List sources via the audio-source lister; empty on any failure
    pub async fn list_audio_sources(&self) -> Vec<AudioSourceInfo> {
        let child = Command::new(&self.audio_lister)
            .args(["list", "short", "sources"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                tracing::debug!("Audio source lister exited with {}", output.status);
                return Vec::new();
            }
            Ok(Err(e)) => {
                tracing::debug!("Audio source lister unavailable: {}", e);
                return Vec::new();
            }
            Err(_) => {
                tracing::debug!("Audio source lister timed out");
                return Vec::new();
            }
        };

        parse_audio_sources(&String::from_utf8_lossy(&output.stdout))
    }

    /// Find the first audio source whose name contains `name_hint`
    pub async fn resolve_audio_device(&self, name_hint: &str) -> Option<String> {
        let sources = self.list_audio_sources().await;
        let found = match_audio_source(&sources, name_hint);

        match &found {
            Some(name) => tracing::info!("Resolved audio source {} for '{}'", name, name_hint),
            None => tracing::debug!("No audio source matches '{}'", name_hint),
        }
        found
    }
}

/// Lowercased, whitespace-split search terms
pub fn search_terms(name_hint: &str) -> Vec<String> {
    name_hint
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

/// Case-insensitive: true when any term occurs in `name`
pub fn name_matches(name: &str, terms: &[String]) -> bool {
    let name = name.to_lowercase();
    terms.iter().any(|term| name.contains(term.as_str()))
}

/// Parse `pactl list short sources` output
///
/// Each line is `index\tname\tdriver\tsample spec\tstate`; malformed lines are
/// skipped.
pub fn parse_audio_sources(output: &str) -> Vec<AudioSourceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let index = fields.next()?.trim().parse::<u32>().ok()?;
            let name = fields.next()?.trim().to_string();
            if name.is_empty() {
                return None;
            }
            Some(AudioSourceInfo {
                index,
                name,
                driver: fields.next().unwrap_or_default().trim().to_string(),
                sample_spec: fields.next().unwrap_or_default().trim().to_string(),
                state: fields.next().unwrap_or_default().trim().to_string(),
            })
        })
        .collect()
}

/// First input source whose lowercased name contains the lowercased hint
///
/// Monitor sources mirror an output device and are never a camera microphone.
pub fn match_audio_source(sources: &[AudioSourceInfo], name_hint: &str) -> Option<String> {
    let hint = name_hint.trim().to_lowercase();
    if hint.is_empty() {
        return None;
    }
    sources
        .iter()
        .filter(|s| !s.is_monitor())
        .find(|s| s.name.to_lowercase().contains(&hint))
        .map(|s| s.name.clone())
}

fn video_node_number(node: &str) -> Option<u32> {
    node.strip_prefix("video")?.parse().ok()
}

async fn read_attribute(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACTL_OUTPUT: &str = "\
0\talsa_output.pci-0000_00_1f.3.analog-stereo.monitor\tmodule-alsa-card.c\ts16le 2ch 48000Hz\tSUSPENDED
1\talsa_input.usb-Remo_Tech_Co.__Ltd._OBSBOT_Tiny_2-02.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 48000Hz\tRUNNING
2\talsa_input.pci-0000_00_1f.3.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tSUSPENDED
garbage line
";

    fn fake_device(root: &Path, node: &str, name: &str, index: u32) {
        let dir = root.join(node);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
        std::fs::write(dir.join("index"), format!("{}\n", index)).unwrap();
    }

    fn resolver_for(root: &Path) -> DeviceResolver {
        let config = RecorderConfig {
            sysfs_video_root: root.to_path_buf(),
            audio_lister_path: PathBuf::from("/nonexistent/pactl"),
            probe_timeout_ms: 1_000,
            ..Default::default()
        };
        DeviceResolver::new(&config)
    }

    #[test]
    fn test_parse_audio_sources() {
        let sources = parse_audio_sources(PACTL_OUTPUT);
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[1].index, 1);
        assert_eq!(sources[1].state, "RUNNING");
        assert!(sources[0].is_monitor());
    }

    #[test]
    fn test_match_audio_source_is_case_insensitive() {
        let sources = parse_audio_sources(PACTL_OUTPUT);
        assert_eq!(
            match_audio_source(&sources, "OBSBOT").as_deref(),
            Some("alsa_input.usb-Remo_Tech_Co.__Ltd._OBSBOT_Tiny_2-02.analog-stereo")
        );
        assert_eq!(match_audio_source(&sources, "elgato"), None);
        assert_eq!(match_audio_source(&sources, "  "), None);
    }

    #[test]
    fn test_match_audio_source_skips_monitors() {
        let sources = parse_audio_sources(PACTL_OUTPUT);
        assert_eq!(
            match_audio_source(&sources, "analog-stereo").as_deref(),
            Some("alsa_input.usb-Remo_Tech_Co.__Ltd._OBSBOT_Tiny_2-02.analog-stereo")
        );
        assert_eq!(match_audio_source(&sources, "monitor"), None);
    }

    #[test]
    fn test_name_matches_any_term() {
        let terms = search_terms("OBSBOT Tail");
        assert!(name_matches("OBSBOT Tiny 2: OBSBOT Tiny 2", &terms));
        assert!(!name_matches("Integrated Camera", &terms));
        assert!(search_terms("   ").is_empty());
    }

    #[tokio::test]
    async fn test_resolve_video_prefers_lowest_capture_node() {
        let dir = tempfile::tempdir().unwrap();
        fake_device(dir.path(), "video10", "OBSBOT Tiny 2", 0);
        fake_device(dir.path(), "video0", "Integrated Camera", 0);
        fake_device(dir.path(), "video2", "OBSBOT Tiny 2", 0);
        fake_device(dir.path(), "video3", "OBSBOT Tiny 2", 1);

        let resolver = resolver_for(dir.path());
        let devices = resolver.list_video_devices().await;
        let numbers: Vec<u32> = devices.iter().map(|d| d.number).collect();
        assert_eq!(numbers, vec![0, 2, 3, 10]);

        assert_eq!(
            resolver.resolve_video_device("obsbot").await.as_deref(),
            Some("/dev/video2")
        );
    }

    #[tokio::test]
    async fn test_resolve_video_skips_metadata_nodes() {
        let dir = tempfile::tempdir().unwrap();
        fake_device(dir.path(), "video1", "OBSBOT Meet", 1);

        let resolver = resolver_for(dir.path());
        assert_eq!(resolver.resolve_video_device("obsbot").await, None);
    }

    #[tokio::test]
    async fn test_resolve_video_missing_registry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(&dir.path().join("missing"));
        assert!(resolver.list_video_devices().await.is_empty());
        assert_eq!(resolver.resolve_video_device("obsbot").await, None);
    }

    #[tokio::test]
    async fn test_resolve_audio_missing_tool_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(dir.path());
        assert_eq!(resolver.resolve_audio_device("obsbot").await, None);
    }
}
