//! Video container/codec abstraction used by the upload pipeline.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::reader::FfmpegReader;
use crate::writer::FfmpegWriter;

/// Properties of the decoded video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate, 0 when the container does not say.
    pub fps: f64,
    pub frame_count: Option<u64>,
}

pub trait VideoReader {
    fn info(&self) -> &VideoInfo;

    /// Next decoded frame, `None` once the stream is exhausted.
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;
}

pub trait VideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()>;

    /// Flushes and finalizes the container. Dropping a writer without
    /// calling this abandons the output.
    fn finish(self: Box<Self>) -> anyhow::Result<()>;
}

pub trait VideoCodec: Send + Sync {
    fn open(&self, input: &Path) -> anyhow::Result<Box<dyn VideoReader>>;

    fn create(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> anyhow::Result<Box<dyn VideoWriter>>;
}

/// ffmpeg settings: libav codecs for uploads, the `ffmpeg` binary for the
/// live camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ffmpeg {
    pub ffmpeg_bin: PathBuf,
    pub encoder: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".into(),
            encoder: "libx264".into(),
        }
    }
}

impl VideoCodec for Ffmpeg {
    fn open(&self, input: &Path) -> anyhow::Result<Box<dyn VideoReader>> {
        crate::init()?;
        Ok(Box::new(FfmpegReader::open(input)?))
    }

    fn create(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> anyhow::Result<Box<dyn VideoWriter>> {
        crate::init()?;
        let writer = FfmpegWriter::create(&self.encoder, output, width, height, fps)?;
        Ok(Box::new(writer))
    }
}
