//! Command line arguments and layered settings.
//!
//! Precedence, lowest first: built-in defaults, the optional TOML file given
//! with `--config`, `CAMSERVE_*` environment variables (nested keys joined
//! with `__`, e.g. `CAMSERVE_SERVER__PORT=9000`), then explicit flags.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use ffmpeg_common::camera::{qscale_from_quality, CameraConfig, CameraSource};
use ffmpeg_common::codec::Ffmpeg;
use ort_common::yolov8::YoloParams;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CAMSERVE";

/// Camera capture resolution, written `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
        let height: u32 = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution must be non-zero, got {s:?}"));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How `POST /upload/video` returns the annotated file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoResponseMode {
    /// `video/mp4` body.
    #[default]
    Raw,
    /// JSON `{ message, video_data }` with base64 bytes.
    Json,
}

#[derive(Debug, Parser)]
#[command(version, about = "Live annotated camera stream and batch annotation server")]
pub struct Args {
    /// Optional TOML settings file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long, short)]
    pub port: Option<u16>,
    /// Camera resolution, e.g. `640x640`.
    #[arg(long, short)]
    pub resolution: Option<Resolution>,
    /// V4L2 camera device.
    #[arg(long)]
    pub device: Option<String>,
    /// Replay a video file in a loop instead of opening a camera.
    #[arg(long, conflicts_with = "device")]
    pub source: Option<PathBuf>,
    /// Serve uploads only, without the live stream source.
    #[arg(long, action)]
    pub no_camera: bool,
    /// Yolov8 onnx model file to use (dynamic axes).
    #[arg(long, short)]
    pub model: Option<PathBuf>,
    /// Fixed-size yolov8 export used for the live stream. Defaults to
    /// `<model stem>_fixed.onnx` when that file exists.
    #[arg(long)]
    pub fast_model: Option<PathBuf>,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action)]
    pub cuda: bool,
    #[arg(long)]
    pub conf_threshold: Option<f32>,
    #[arg(long)]
    pub nms_threshold: Option<f32>,
    /// TTF/OTF font for labels and the live overlay, replacing the bundled one.
    #[arg(long)]
    pub font: Option<PathBuf>,
    /// Where annotated uploads are saved.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub video_response: Option<VideoResponseMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload body, in bytes.
    pub upload_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            upload_limit: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub enabled: bool,
    pub device: String,
    pub source: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub framerate: Option<u32>,
    /// JPEG quality (1..=100) of the captured frames.
    pub quality: u8,
    pub startup_timeout_secs: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/video0".into(),
            source: None,
            width: 640,
            height: 640,
            framerate: None,
            quality: 90,
            startup_timeout_secs: 10,
        }
    }
}

impl CameraSettings {
    pub fn camera_config(&self) -> CameraConfig {
        let source = match &self.source {
            Some(path) => CameraSource::File(path.clone()),
            None => CameraSource::Device(self.device.clone()),
        };
        CameraConfig {
            source,
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            quality: qscale_from_quality(self.quality),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub fast_path: Option<PathBuf>,
    pub cuda: bool,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    pub full_input_size: u32,
    pub fast_input_size: u32,
    pub font: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let params = YoloParams::default();
        Self {
            path: "_models/yolov8s.onnx".into(),
            fast_path: None,
            cuda: false,
            conf_threshold: params.conf_threshold,
            nms_threshold: params.nms_threshold,
            full_input_size: params.full_input_size,
            fast_input_size: params.fast_input_size,
            font: None,
        }
    }
}

impl ModelSettings {
    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            conf_threshold: self.conf_threshold,
            nms_threshold: self.nms_threshold,
            full_input_size: self.full_input_size,
            fast_input_size: self.fast_input_size,
            ..YoloParams::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// JPEG quality of annotated live frames.
    pub jpeg_quality: u8,
    /// Number of recent inference jobs kept for timing stats.
    pub stats_window: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: inference_common::jpeg::DEFAULT_QUALITY,
            stats_window: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub output_dir: PathBuf,
    /// Scratch directory for uploaded videos, the system temp dir if unset.
    pub temp_dir: Option<PathBuf>,
    pub video_fps: f64,
    pub jpeg_quality: u8,
    pub video_response: VideoResponseMode,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            output_dir: "/tmp/annotated_output".into(),
            temp_dir: None,
            video_fps: 20.0,
            jpeg_quality: 95,
            video_response: VideoResponseMode::Raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub stream: StreamSettings,
    pub upload: UploadSettings,
    pub ffmpeg: Ffmpeg,
}

impl Settings {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply_args(args);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(resolution) = args.resolution {
            self.camera.width = resolution.width;
            self.camera.height = resolution.height;
        }
        if let Some(device) = &args.device {
            self.camera.device = device.clone();
            self.camera.source = None;
        }
        if let Some(source) = &args.source {
            self.camera.source = Some(source.clone());
        }
        if args.no_camera {
            self.camera.enabled = false;
        }
        if let Some(model) = &args.model {
            self.model.path = model.clone();
        }
        if let Some(fast_model) = &args.fast_model {
            self.model.fast_path = Some(fast_model.clone());
        }
        if args.cuda {
            self.model.cuda = true;
        }
        if let Some(conf) = args.conf_threshold {
            self.model.conf_threshold = conf;
        }
        if let Some(nms) = args.nms_threshold {
            self.model.nms_threshold = nms;
        }
        if let Some(font) = &args.font {
            self.model.font = Some(font.clone());
        }
        if let Some(output_dir) = &args.output_dir {
            self.upload.output_dir = output_dir.clone();
        }
        if let Some(mode) = args.video_response {
            self.upload.video_response = mode;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.model.conf_threshold) {
            anyhow::bail!("conf_threshold must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.model.nms_threshold) {
            anyhow::bail!("nms_threshold must be within 0..=1");
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            anyhow::bail!("camera resolution must be non-zero");
        }
        if self.upload.video_fps <= 0.0 {
            anyhow::bail!("video_fps must be positive");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
