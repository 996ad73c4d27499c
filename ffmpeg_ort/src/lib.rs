//! Live annotated MJPEG camera stream plus batch image/video annotation
//! over HTTP.

pub mod config;
pub mod error;
pub mod frame_buffer;
pub mod mjpeg;
pub mod persist;
pub mod server;
pub mod upload;

#[cfg(test)]
mod test_support;
