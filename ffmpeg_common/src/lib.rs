//! Video io on top of ffmpeg.
//!
//! Uploaded files are decoded and encoded in process through `ffmpeg-next`.
//! The live camera runs the `ffmpeg` binary and reads MJPEG from its stdout.

extern crate ffmpeg_next as ffmpeg;

use anyhow::Context;

pub mod camera;
pub mod codec;
pub mod jpeg_splitter;
pub mod reader;
pub mod writer;

mod plane;

/// Initializes libav and limits its own logging to errors. Safe to call
/// more than once.
pub fn init() -> anyhow::Result<()> {
    ffmpeg::init().context("Failed to initialize ffmpeg")?;
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}
