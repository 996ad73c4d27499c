//! Live capture: ffmpeg encodes the source to MJPEG on stdout, the pipe is
//! split into JPEG frames and pushed into a [`FrameSink`].

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use crate::jpeg_splitter::JpegSplitter;

/// Receives every encoded frame the camera produces. Must return quickly,
/// the capture thread is blocked while it runs.
pub trait FrameSink: Send + Sync {
    fn write(&self, frame: Bytes);
}

#[derive(Debug, Clone, PartialEq)]
pub enum CameraSource {
    /// V4L2 device node, e.g. `/dev/video0`.
    Device(String),
    /// Video file replayed in a loop at its native rate.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub source: CameraSource,
    pub width: u32,
    pub height: u32,
    pub framerate: Option<u32>,
    /// ffmpeg `-q:v` scale, 2 (best) ..= 31 (worst).
    pub quality: u8,
    pub startup_timeout: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::Device("/dev/video0".into()),
            width: 640,
            height: 640,
            framerate: None,
            quality: 5,
            startup_timeout: Duration::from_secs(10),
        }
    }
}

/// Maps a 1..=100 JPEG quality to ffmpeg's inverted 2..=31 `q:v` scale.
pub fn qscale_from_quality(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (31 - (quality - 1) * 29 / 99) as u8
}

impl CameraConfig {
    fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .map(String::from)
            .to_vec();
        match &self.source {
            CameraSource::Device(device) => {
                args.extend(["-f".into(), "v4l2".into()]);
                if let Some(fps) = self.framerate {
                    args.extend(["-framerate".into(), fps.to_string()]);
                }
                args.extend([
                    "-video_size".into(),
                    format!("{}x{}", self.width, self.height),
                    "-i".into(),
                    device.clone(),
                ]);
            }
            CameraSource::File(path) => {
                args.extend(["-re".into(), "-stream_loop".into(), "-1".into()]);
                args.extend(["-i".into(), path.to_string_lossy().into_owned()]);
            }
        }
        args.extend(["-an".into(), "-vf".into()]);
        args.push(format!("scale={}:{}", self.width, self.height));
        if let (CameraSource::File(_), Some(fps)) = (&self.source, self.framerate) {
            args.extend(["-r".into(), fps.to_string()]);
        }
        args.extend([
            "-f".into(),
            "mjpeg".into(),
            "-q:v".into(),
            self.quality.to_string(),
            "-".into(),
        ]);
        args
    }
}

pub struct Camera {
    child: Child,
    reader: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl Camera {
    /// Spawns the capture process and blocks until the first frame reached
    /// `sink`, failing when none arrives within `startup_timeout`.
    pub fn start(
        ffmpeg: &Path,
        config: &CameraConfig,
        sink: Arc<dyn FrameSink>,
    ) -> anyhow::Result<Self> {
        let args = config.ffmpeg_args();
        log::debug!("Starting capture: {ffmpeg:?} {}", args.join(" "));
        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {ffmpeg:?}"))?;
        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        let stderr = drain_stderr(child.stderr.take());

        let stopping = Arc::new(AtomicBool::new(false));
        let (first_tx, first_rx) = mpsc::sync_channel(1);
        let reader = {
            let stopping = stopping.clone();
            thread::Builder::new()
                .name("camera-capture".into())
                .spawn(move || capture_loop(stdout, sink, first_tx, stopping))
                .context("Failed to spawn capture thread")?
        };
        let mut camera = Self {
            child,
            reader: Some(reader),
            stopping,
        };

        match first_rx.recv_timeout(config.startup_timeout) {
            Ok(()) => {
                log::info!(
                    "Camera {:?} streaming at {}x{}",
                    config.source,
                    config.width,
                    config.height
                );
                // stderr is only interesting on startup failure, leave it draining
                drop(stderr);
                Ok(camera)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                camera.stop();
                anyhow::bail!(
                    "Camera {:?} produced no frame within {:?}: {}",
                    config.source,
                    config.startup_timeout,
                    collect_stderr(stderr)
                )
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                camera.stop();
                anyhow::bail!(
                    "Camera {:?} exited before the first frame: {}",
                    config.source,
                    collect_stderr(stderr)
                )
            }
        }
    }

    /// Kills the capture process and joins the reader thread.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut stdout: ChildStdout,
    sink: Arc<dyn FrameSink>,
    first_frame: mpsc::SyncSender<()>,
    stopping: Arc<AtomicBool>,
) {
    let mut splitter = JpegSplitter::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut first_frame = Some(first_frame);
    let mut frames = 0u64;
    loop {
        let n = match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("Camera read failed: {e}");
                break;
            }
        };
        for frame in splitter.push(&chunk[..n]) {
            sink.write(Bytes::from(frame));
            frames += 1;
            if let Some(tx) = first_frame.take() {
                let _ = tx.send(());
            }
        }
    }
    if stopping.load(Ordering::SeqCst) {
        log::info!("Camera stopped after {frames} frames");
    } else {
        log::error!("Camera stream ended unexpectedly after {frames} frames");
    }
}

/// Drains a child's stderr on a helper thread so the pipe never fills up.
fn drain_stderr(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    let mut stderr = stderr?;
    thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut out = String::new();
            let _ = stderr.read_to_string(&mut out);
            out
        })
        .ok()
}

fn collect_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_args() {
        let config = CameraConfig {
            framerate: Some(30),
            ..Default::default()
        };
        let args = config.ffmpeg_args().join(" ");
        assert!(args.contains("-f v4l2 -framerate 30 -video_size 640x640 -i /dev/video0"));
        assert!(args.ends_with("-vf scale=640:640 -f mjpeg -q:v 5 -"));
    }

    #[test]
    fn file_source_loops() {
        let config = CameraConfig {
            source: CameraSource::File("clip.mp4".into()),
            width: 320,
            height: 240,
            ..Default::default()
        };
        let args = config.ffmpeg_args().join(" ");
        assert!(args.contains("-re -stream_loop -1 -i clip.mp4"));
        assert!(args.contains("scale=320:240"));
        assert!(!args.contains("v4l2"));
    }

    #[test]
    fn quality_maps_onto_qscale() {
        assert_eq!(qscale_from_quality(100), 2);
        assert_eq!(qscale_from_quality(1), 31);
        assert_eq!(qscale_from_quality(0), 31);
        let mid = qscale_from_quality(80);
        assert!((2..=31).contains(&mid));
    }

    #[test]
    fn missing_binary_fails_at_startup() {
        struct Nop;
        impl FrameSink for Nop {
            fn write(&self, _frame: Bytes) {}
        }
        let result = Camera::start(
            Path::new("/nonexistent/ffmpeg"),
            &CameraConfig::default(),
            Arc::new(Nop),
        );
        assert!(result.is_err());
    }
}
