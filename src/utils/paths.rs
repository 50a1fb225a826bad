//! Output file naming

use crate::utils::error::{RecordingError, RecordingResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

/// Timestamp fragment for output file names
///
/// ISO-8601 with millisecond precision where colons and dots become dashes,
/// e.g. `2026-10-19T08-15-30-123Z`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Build `<dir>/<prefix>_<timestamp>.<extension>`
pub fn timestamped_output_path(
    dir: &Path,
    prefix: &str,
    at: DateTime<Utc>,
    extension: &str,
) -> PathBuf {
    dir.join(format!("{}_{}.{}", prefix, file_timestamp(at), extension))
}

/// Fail unless `path` exists and holds data
pub async fn verify_output_file(path: &Path) -> RecordingResult<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(RecordingError::Encoding(format!(
            "{} is empty",
            path.display()
        ))),
        Err(e) => Err(RecordingError::Encoding(format!(
            "{} was not written: {}",
            path.display(),
            e
        ))),
    }
}

/// Platform videos directory, falling back to `~/Videos`
pub fn default_recordings_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_timestamp_replaces_separators() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 30).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(file_timestamp(at), "2026-10-19T08-15-30-123Z");
    }

    #[test]
    fn test_timestamped_output_path() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let path = timestamped_output_path(Path::new("/videos"), "PTZCam", at, "mp4");
        assert_eq!(
            path,
            PathBuf::from("/videos/PTZCam_2026-01-02T03-04-05-000Z.mp4")
        );
    }

    #[tokio::test]
    async fn test_verify_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.mp4");
        let full = dir.path().join("full.mp4");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"moov").unwrap();

        assert!(verify_output_file(&empty).await.is_err());
        assert!(verify_output_file(&dir.path().join("missing.mp4")).await.is_err());
        assert_eq!(verify_output_file(&full).await.unwrap(), 4);
    }
}
