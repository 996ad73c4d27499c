//! Stub collaborators shared by the unit tests and `tests/http_api.rs`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_common::codec::{VideoCodec, VideoInfo, VideoReader, VideoWriter};
use image::{DynamicImage, RgbImage};
use inference_common::annotate::Annotator;
use inference_common::bbox::Bbox;
use inference_common::detection::Detection;
use inference_common::detector::{Detector, Inference, Profile};
use inference_common::frame_times::FrameTimes;

pub fn jpeg_frame(width: u32, height: u32, shade: u8) -> Bytes {
    let img = RgbImage::from_pixel(width, height, image::Rgb([shade; 3]));
    Bytes::from(inference_common::jpeg::encode(&img, 90).unwrap())
}

/// Returns one fixed box per call after an optional delay, recording how
/// many calls overlapped.
#[derive(Default)]
pub struct Counting {
    pub delay: Duration,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Detector for Counting {
    fn detect(
        &self,
        _image: &DynamicImage,
        _profile: Profile,
        _frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Detection>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Detection::new(0, Bbox::new(1.0, 1.0, 6.0, 6.0, 0.9))])
    }
}

pub struct Failing;

impl Detector for Failing {
    fn detect(
        &self,
        _image: &DynamicImage,
        _profile: Profile,
        _frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Detection>> {
        anyhow::bail!("model exploded")
    }
}

pub struct Panicking;

impl Detector for Panicking {
    fn detect(
        &self,
        _image: &DynamicImage,
        _profile: Profile,
        _frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Detection>> {
        panic!("detector bug")
    }
}

pub fn inference(detector: impl Detector + 'static) -> Inference {
    Inference::new(Arc::new(detector), Annotator::new())
}

/// Fake container: `TAGS:1,2,3` decodes to one solid frame per tag, the
/// writer stores the tag read back from the bottom-right pixel of every
/// frame, away from boxes and labels drawn near the top-left.
pub struct TagCodec;

const TAG_FRAME_SIZE: u32 = 32;

pub fn tagged_video(tags: &[u8]) -> Vec<u8> {
    let list: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    format!("TAGS:{}", list.join(",")).into_bytes()
}

struct TagReader {
    info: VideoInfo,
    tags: std::vec::IntoIter<u8>,
}

impl VideoReader for TagReader {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        Ok(self
            .tags
            .next()
            .map(|tag| RgbImage::from_pixel(self.info.width, self.info.height, image::Rgb([tag; 3]))))
    }
}

struct TagWriter {
    path: PathBuf,
    tags: Vec<u8>,
}

impl VideoWriter for TagWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        let (width, height) = frame.dimensions();
        self.tags.push(frame.get_pixel(width - 1, height - 1)[0]);
        Ok(())
    }

    fn finish(self: Box<Self>) -> anyhow::Result<()> {
        std::fs::write(&self.path, tagged_video(&self.tags))?;
        Ok(())
    }
}

impl VideoCodec for TagCodec {
    fn open(&self, input: &Path) -> anyhow::Result<Box<dyn VideoReader>> {
        let text = std::fs::read_to_string(input)?;
        let list = text
            .strip_prefix("TAGS:")
            .ok_or_else(|| anyhow::anyhow!("not a tagged video"))?;
        let tags = list
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(TagReader {
            info: VideoInfo {
                width: TAG_FRAME_SIZE,
                height: TAG_FRAME_SIZE,
                fps: 30.0,
                frame_count: Some(tags.len() as u64),
            },
            tags: tags.into_iter(),
        }))
    }

    fn create(
        &self,
        output: &Path,
        _width: u32,
        _height: u32,
        _fps: f64,
    ) -> anyhow::Result<Box<dyn VideoWriter>> {
        std::fs::write(output, b"")?;
        Ok(Box::new(TagWriter {
            path: output.to_path_buf(),
            tags: Vec::new(),
        }))
    }
}
