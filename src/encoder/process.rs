//! Hardware encoder process supervision
//!
//! `EncoderProcessManager` owns at most one encoder child process. It builds
//! the invocation, feeds raw frames when the encoder reads stdin, observes the
//! process exit asynchronously and stops it with an interrupt so the container
//! trailer gets written.

use crate::config::RecorderConfig;
use crate::encoder::args::{CaptureInput, EncoderCommandBuilder};
use crate::encoder::monitor::{spawn_monitor, StderrSummary};
use crate::encoder::probe::HardwareEncoder;
use crate::utils::error::{RecordingError, RecordingResult};
use crate::utils::paths::{timestamped_output_path, verify_output_file};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::time::Instant;

/// How long to let the stderr monitor catch up after an early exit
const MONITOR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What to encode and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRequest {
    pub encoder: HardwareEncoder,
    pub input: CaptureInput,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Terminal state of an encoder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Process exited on its own or after the interrupt
    Exited { code: Option<i32> },
    /// Process was force-killed after ignoring the interrupt
    Killed,
    /// Waiting on the process failed
    Failed(String),
}

impl ProcessExit {
    pub(crate) fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => ProcessExit::Exited {
                code: status.code(),
            },
            Err(e) => ProcessExit::Failed(e.to_string()),
        }
    }
}

/// A started encoder as seen from outside the manager
///
/// Carries the output path and a way to learn about the exit, never the
/// process itself.
#[derive(Debug, Clone)]
pub struct EncoderSession {
    pub output_path: PathBuf,
    pub pid: u32,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl EncoderSession {
    pub fn new(
        output_path: PathBuf,
        pid: u32,
        exit_rx: watch::Receiver<Option<ProcessExit>>,
    ) -> Self {
        Self {
            output_path,
            pid,
            exit_rx,
        }
    }

    /// Resolves once the process has exited, requested or not
    pub async fn exited(mut self) -> ProcessExit {
        wait_for_exit(&mut self.exit_rx).await
    }
}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
    match exit_rx.wait_for(|exit| exit.is_some()).await {
        Ok(exit) => exit
            .clone()
            .unwrap_or_else(|| ProcessExit::Failed("exit state missing".to_string())),
        Err(_) => ProcessExit::Failed("exit watcher dropped".to_string()),
    }
}

/// Cloneable control surface of a live child: write, signal, await exit
#[derive(Clone)]
struct ProcessControl {
    pid: u32,
    raw_input: bool,
    stdin: Arc<AsyncMutex<Option<ChildStdin>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessControl {
    async fn write(&self, bytes: &[u8]) -> bool {
        if !self.raw_input {
            return false;
        }
        let mut guard = self.stdin.lock().await;
        let Some(pipe) = guard.as_mut() else {
            return false;
        };
        match pipe.write_all(bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Encoder {} stdin closed: {}", self.pid, e);
                *guard = None;
                false
            }
        }
    }

    /// Drop the stdin pipe so the encoder sees end of input
    async fn close_input(&self) {
        if let Some(mut pipe) = self.stdin.lock().await.take() {
            let _ = pipe.shutdown().await;
        }
    }

    #[cfg(unix)]
    async fn interrupt(&self) -> std::io::Result<()> {
        if self.pid == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "encoder pid unknown",
            ));
        }
        let pid = libc::pid_t::try_from(self.pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
        })?;
        // SAFETY: kill(2) takes plain integers and has no memory preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGINT) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    async fn interrupt(&self) -> std::io::Result<()> {
        // No interrupt signal here; the encoder's "q" command ends it cleanly.
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(pipe) => {
                pipe.write_all(b"q").await?;
                pipe.flush().await
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdin already closed",
            )),
        }
    }

    /// Resolves once the watcher has observed the exit
    async fn exited(&mut self) -> ProcessExit {
        wait_for_exit(&mut self.exit_rx).await
    }
}

/// Exclusive ownership record of the running encoder
///
/// The `Child` itself lives in the watcher task; this handle holds the control
/// surface and the kill switch. Only the manager ever sees it.
struct ChildProcessHandle {
    control: ProcessControl,
    generation: u64,
    output_path: PathBuf,
    kill_tx: Option<oneshot::Sender<()>>,
    stopping: bool,
}

/// Supervises the hardware encoder child process
pub struct EncoderProcessManager {
    config: RecorderConfig,
    live: Arc<Mutex<Option<ChildProcessHandle>>>,
    generation: AtomicU64,
}

impl EncoderProcessManager {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            live: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether an encoder process is currently running
    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }

    /// PID of the running encoder, as a lookup key only
    pub fn current_pid(&self) -> Option<u32> {
        self.live.lock().as_ref().map(|h| h.control.pid)
    }

    /// Spawn the encoder and return the file it writes plus its exit signal
    ///
    /// The call resolves once the process has survived the startup grace
    /// period. An early exit is reported as `DeviceConflict` when the encoder
    /// complained about a busy device, otherwise as `Spawn`.
    pub async fn start(&self, request: &HardwareRequest) -> RecordingResult<EncoderSession> {
        if self.is_live() {
            return Err(RecordingError::AlreadyRecording);
        }

        tokio::fs::create_dir_all(&self.config.recordings_dir).await?;
        let output_path = timestamped_output_path(
            &self.config.recordings_dir,
            &self.config.file_prefix,
            Utc::now(),
            "mp4",
        );

        let args = EncoderCommandBuilder::new(request.encoder, request.input.clone(), &output_path)
            .with_resolution(request.width, request.height)
            .with_framerate(request.fps)
            .with_vaapi_device(&self.config.vaapi_device)
            .with_device_input_format(&self.config.device_input_format)
            .build();

        let raw_input = request.input.is_raw();
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(&args)
            .stdin(if raw_input || cfg!(not(unix)) {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let summary = Arc::new(StderrSummary::default());
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (control, child, monitor) = {
            let mut slot = self.live.lock();
            if slot.is_some() {
                return Err(RecordingError::AlreadyRecording);
            }

            let mut child = command.spawn().map_err(|e| {
                RecordingError::Spawn(format!("{}: {}", self.config.ffmpeg_path.display(), e))
            })?;
            let pid = child.id().unwrap_or_default();
            let monitor = child
                .stderr
                .take()
                .map(|stderr| spawn_monitor(stderr, format!("encoder[{}]", pid), summary.clone()));

            let control = ProcessControl {
                pid,
                raw_input,
                stdin: Arc::new(AsyncMutex::new(child.stdin.take())),
                exit_rx,
            };
            *slot = Some(ChildProcessHandle {
                control: control.clone(),
                generation,
                output_path: output_path.clone(),
                kill_tx: Some(kill_tx),
                stopping: false,
            });
            (control, child, monitor)
        };

        tracing::info!(
            "Started {} encoder (pid {}, {}): {:?}",
            request.encoder,
            control.pid,
            if raw_input { "raw frames" } else { "device capture" },
            args
        );

        self.spawn_watcher(child, generation, exit_tx, kill_rx);

        let mut startup = control.clone();
        match tokio::time::timeout(self.config.startup_grace(), startup.exited()).await {
            Err(_) => {
                tracing::info!("Encoder {} recording to {:?}", control.pid, output_path);
                Ok(EncoderSession::new(
                    output_path,
                    control.pid,
                    control.exit_rx.clone(),
                ))
            }
            Ok(exit) => {
                if let Some(monitor) = monitor {
                    let _ = tokio::time::timeout(MONITOR_DRAIN_TIMEOUT, monitor).await;
                }
                let detail = summary
                    .last_error()
                    .unwrap_or_else(|| format!("{:?}", exit));
                tracing::error!("Encoder exited during startup: {}", detail);

                if summary.device_busy() {
                    Err(RecordingError::DeviceConflict(
                        request.input.device_label().to_string(),
                    ))
                } else {
                    Err(RecordingError::Spawn(format!(
                        "encoder exited during startup: {}",
                        detail
                    )))
                }
            }
        }
    }

    /// Feed one raw frame; false when there is no writable input pipe
    ///
    /// Frames are written in call order with no queueing; the caller paces
    /// writes to the stream's frame rate.
    pub async fn write_frame(&self, bytes: &[u8]) -> bool {
        let control = match self.live.lock().as_ref() {
            Some(handle) if !handle.stopping => handle.control.clone(),
            _ => return false,
        };
        control.write(bytes).await
    }

    /// Interrupt the encoder and wait for it to exit
    ///
    /// Resolves only after the process is gone. If it ignores the interrupt
    /// for longer than the stop timeout it is killed and the stop fails.
    pub async fn stop(&self) -> RecordingResult<PathBuf> {
        let (mut control, output_path, kill_tx) = {
            let mut slot = self.live.lock();
            let handle = match slot.as_mut() {
                Some(handle) if !handle.stopping => handle,
                _ => return Err(RecordingError::NotRecording),
            };
            handle.stopping = true;
            (
                handle.control.clone(),
                handle.output_path.clone(),
                handle.kill_tx.take(),
            )
        };

        tracing::info!("Stopping encoder {}", control.pid);

        let timeout = self.config.stop_timeout();
        let deadline = Instant::now() + timeout;

        // Signal before touching stdin: a writer blocked on a full pipe holds it.
        match tokio::time::timeout_at(deadline, control.interrupt()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Interrupting encoder {} failed: {}", control.pid, e),
            Err(_) => tracing::debug!("Interrupting encoder {} timed out", control.pid),
        }
        if control.raw_input
            && tokio::time::timeout_at(deadline, control.close_input())
                .await
                .is_err()
        {
            tracing::debug!("Encoder {} input still busy at the stop deadline", control.pid);
        }

        let exit = match tokio::time::timeout_at(deadline, control.exited()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::warn!(
                    "Encoder {} still running {:?} after interrupt, killing it",
                    control.pid,
                    timeout
                );
                if let Some(kill_tx) = kill_tx {
                    let _ = kill_tx.send(());
                }
                let exit = control.exited().await;
                return Err(RecordingError::Process(format!(
                    "encoder did not stop within {:?} and was killed ({:?})",
                    timeout, exit
                )));
            }
        };

        let bytes = verify_output_file(&output_path).await?;
        tracing::info!(
            "Encoder {} stopped ({:?}), wrote {} bytes to {:?}",
            control.pid,
            exit,
            bytes,
            output_path
        );
        Ok(output_path)
    }

    fn spawn_watcher(
        &self,
        mut child: Child,
        generation: u64,
        exit_tx: watch::Sender<Option<ProcessExit>>,
        mut kill_rx: oneshot::Receiver<()>,
    ) {
        let live = self.live.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => ProcessExit::from_wait(status),
                Ok(()) = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("Failed to kill encoder: {}", e);
                    }
                    match child.wait().await {
                        Ok(_) => ProcessExit::Killed,
                        Err(e) => ProcessExit::Failed(e.to_string()),
                    }
                }
            };

            match &exit {
                ProcessExit::Exited { code } => tracing::info!("Encoder process exited with code {:?}", code),
                ProcessExit::Killed => tracing::warn!("Encoder process killed"),
                ProcessExit::Failed(e) => tracing::error!("Encoder process error: {}", e),
            }

            {
                let mut slot = live.lock();
                if slot.as_ref().map(|h| h.generation) == Some(generation) {
                    *slot = None;
                }
            }
            exit_tx.send_replace(Some(exit));
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use std::path::Path;

    /// Records its arguments, writes the output file on SIGINT
    const GRACEFUL_ENCODER: &str = r#"
for a in "$@"; do out="$a"; done
echo "$@" > "$(dirname "$0")/args"
trap 'echo trailer > "$out"; exit 255' INT
while :; do sleep 0.05; done
"#;

    fn manager(dir: &Path, ffmpeg: PathBuf) -> EncoderProcessManager {
        EncoderProcessManager::new(RecorderConfig {
            ffmpeg_path: ffmpeg,
            recordings_dir: dir.join("videos"),
            startup_grace_ms: 200,
            stop_timeout_ms: 3_000,
            ..Default::default()
        })
    }

    fn device_request() -> HardwareRequest {
        HardwareRequest {
            encoder: HardwareEncoder::Nvenc,
            input: CaptureInput::Device {
                device_path: "/dev/video2".to_string(),
                audio_source: None,
            },
            width: 3840,
            height: 2160,
            fps: 30,
        }
    }

    #[tokio::test]
    async fn test_start_and_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", GRACEFUL_ENCODER);
        let manager = manager(dir.path(), ffmpeg);

        let session = manager.start(&device_request()).await.unwrap();
        let path = session.output_path.clone();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(manager.is_live());
        assert_eq!(manager.current_pid(), Some(session.pid));

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert!(args.contains("-i /dev/video2"));
        assert!(args.contains("-input_format mjpeg"));
        assert!(args.contains("h264_nvenc"));

        let stopped = manager.stop().await.unwrap();
        assert_eq!(stopped, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "trailer");
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", GRACEFUL_ENCODER);
        let manager = manager(dir.path(), ffmpeg);

        manager.start(&device_request()).await.unwrap();
        let pid = manager.current_pid();
        assert!(matches!(
            manager.start(&device_request()).await,
            Err(RecordingError::AlreadyRecording)
        ));
        assert_eq!(manager.current_pid(), pid);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_process() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), PathBuf::from("/nonexistent/ffmpeg"));
        assert!(matches!(manager.stop().await, Err(RecordingError::NotRecording)));
    }

    #[tokio::test]
    async fn test_write_frame_without_process_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), PathBuf::from("/nonexistent/ffmpeg"));
        assert!(!manager.write_frame(&[0u8; 16]).await);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), PathBuf::from("/nonexistent/ffmpeg"));
        assert!(matches!(
            manager.start(&device_request()).await,
            Err(RecordingError::Spawn(_))
        ));
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_write_frame_in_device_mode_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", GRACEFUL_ENCODER);
        let manager = manager(dir.path(), ffmpeg);

        manager.start(&device_request()).await.unwrap();
        assert!(!manager.write_frame(&[0u8; 16]).await);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_frames_reach_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "for a in \"$@\"; do out=\"$a\"; done\ntrap '' INT\ncat > \"$out\"\n",
        );
        let manager = manager(dir.path(), ffmpeg);
        let request = HardwareRequest {
            input: CaptureInput::RawFrames,
            width: 4,
            height: 2,
            ..device_request()
        };

        manager.start(&request).await.unwrap();
        let frame = vec![7u8; 4 * 2 * 4];
        assert!(manager.write_frame(&frame).await);
        assert!(manager.write_frame(&frame).await);

        let path = manager.stop().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), frame.len() * 2);
    }

    #[tokio::test]
    async fn test_busy_device_is_device_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "echo '/dev/video2: Device or resource busy' >&2\nexit 1\n",
        );
        let manager = manager(dir.path(), ffmpeg);

        assert!(matches!(
            manager.start(&device_request()).await,
            Err(RecordingError::DeviceConflict(_))
        ));
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_early_exit_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "echo 'Unknown encoder h264_nvenc' >&2\nexit 1\n",
        );
        let manager = manager(dir.path(), ffmpeg);

        assert!(matches!(
            manager.start(&device_request()).await,
            Err(RecordingError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_crash_clears_live_handle() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", "sleep 0.4\nexit 1\n");
        let manager = manager(dir.path(), ffmpeg);

        manager.start(&device_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert!(!manager.is_live());
        assert!(matches!(manager.stop().await, Err(RecordingError::NotRecording)));
    }

    #[tokio::test]
    async fn test_session_reports_unrequested_exit() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", "sleep 0.4\nexit 3\n");
        let manager = manager(dir.path(), ffmpeg);

        let session = manager.start(&device_request()).await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), session.exited())
            .await
            .unwrap();
        assert_eq!(exit, ProcessExit::Exited { code: Some(3) });
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_configured_input_format_is_requested() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", GRACEFUL_ENCODER);
        let manager = EncoderProcessManager::new(RecorderConfig {
            ffmpeg_path: ffmpeg,
            recordings_dir: dir.path().join("videos"),
            startup_grace_ms: 200,
            device_input_format: "yuyv422".to_string(),
            ..Default::default()
        });

        manager.start(&device_request()).await.unwrap();
        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert!(args.contains("-input_format yuyv422"));
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_not_held_up_by_blocked_frame_write() {
        let dir = tempfile::tempdir().unwrap();
        // Never reads stdin, so a large frame fills the pipe and blocks.
        let ffmpeg = write_script(dir.path(), "ffmpeg", GRACEFUL_ENCODER);
        let manager = Arc::new(EncoderProcessManager::new(RecorderConfig {
            ffmpeg_path: ffmpeg,
            recordings_dir: dir.path().join("videos"),
            startup_grace_ms: 200,
            stop_timeout_ms: 1_000,
            ..Default::default()
        }));
        let request = HardwareRequest {
            input: CaptureInput::RawFrames,
            width: 640,
            height: 480,
            ..device_request()
        };

        let session = manager.start(&request).await.unwrap();
        let writer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.write_frame(&vec![0u8; 640 * 480 * 4]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!writer.is_finished());

        let stopped = tokio::time::timeout(Duration::from_secs(5), manager.stop())
            .await
            .expect("stop must not wait on the blocked writer");
        assert_eq!(stopped.unwrap(), session.output_path);

        let written = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(!written);
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_unresponsive_encoder_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "trap '' INT\nwhile :; do sleep 0.05; done\n",
        );
        let manager = EncoderProcessManager::new(RecorderConfig {
            ffmpeg_path: ffmpeg,
            recordings_dir: dir.path().join("videos"),
            startup_grace_ms: 100,
            stop_timeout_ms: 300,
            ..Default::default()
        });

        manager.start(&device_request()).await.unwrap();
        assert!(matches!(manager.stop().await, Err(RecordingError::Process(_))));
        assert!(!manager.is_live());
    }
}
