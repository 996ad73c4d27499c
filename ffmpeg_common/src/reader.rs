use std::path::Path;

use anyhow::Context as _;
use ffmpeg::format::{context::Input, input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Rational;
use image::RgbImage;

use crate::codec::{VideoInfo, VideoReader};
use crate::plane::copy_plane;

/// Decodes the best video stream of a file into rgb24 frames, in
/// presentation order. Frames keep their coded size, display rotation
/// metadata is not applied.
pub struct FfmpegReader {
    ictx: Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<Scaler>,
    decoded: Video,
    info: VideoInfo,
    eof_sent: bool,
}

/// RGB24 converter for one source geometry.
struct Scaler {
    format: Pixel,
    width: u32,
    height: u32,
    context: Context,
}

impl Scaler {
    fn new(format: Pixel, width: u32, height: u32) -> anyhow::Result<Self> {
        let context = Context::get(
            format,
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .with_context(|| format!("No {format:?} to RGB24 conversion for {width}x{height}"))?;
        Ok(Self {
            format,
            width,
            height,
            context,
        })
    }

    fn matches(&self, frame: &Video) -> bool {
        (self.format, self.width, self.height) == (frame.format(), frame.width(), frame.height())
    }
}

fn rate_to_fps(rate: Rational) -> Option<f64> {
    (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate))
}

impl FfmpegReader {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let ictx = input(&path).with_context(|| format!("Failed to open {path:?}"))?;
        let (stream_index, decoder, fps, frames) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or(ffmpeg::Error::StreamNotFound)?;
            let context_decoder =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
            let decoder = context_decoder
                .decoder()
                .video()
                .context("Failed to open video decoder")?;
            let fps = rate_to_fps(stream.avg_frame_rate()).or_else(|| rate_to_fps(stream.rate()));
            (stream.index(), decoder, fps, stream.frames())
        };
        if decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("Video stream of {path:?} has no dimensions");
        }

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps: fps.unwrap_or(0.0),
            frame_count: u64::try_from(frames).ok().filter(|&n| n > 0),
        };
        log::debug!("Opened {path:?}: {info:?}, decoder {:?}", decoder.format());

        Ok(Self {
            ictx,
            stream_index,
            decoder,
            scaler: None,
            decoded: Video::empty(),
            info,
            eof_sent: false,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let index = self.stream_index;
        self.ictx
            .packets()
            .find_map(|(stream, packet)| (stream.index() == index).then_some(packet))
    }

    /// Converts the last decoded frame. The scaler follows the frame's own
    /// geometry, so a mid-stream size change is handled.
    fn convert(&mut self) -> anyhow::Result<RgbImage> {
        let mut scaler = match self.scaler.take() {
            Some(scaler) if scaler.matches(&self.decoded) => scaler,
            _ => Scaler::new(
                self.decoded.format(),
                self.decoded.width(),
                self.decoded.height(),
            )?,
        };
        let mut rgb = Video::empty();
        let result = scaler.context.run(&self.decoded, &mut rgb);
        self.scaler = Some(scaler);
        result.context("Failed to convert frame to RGB24")?;
        rgb_image(&rgb)
    }
}

/// Packs an rgb24 frame, dropping libav's line padding.
fn rgb_image(frame: &Video) -> anyhow::Result<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let row_len = width as usize * 3;
    let mut buf = vec![0u8; row_len * height as usize];
    copy_plane(
        frame.data(0),
        frame.stride(0),
        &mut buf,
        row_len,
        row_len,
        height as usize,
    );
    RgbImage::from_raw(width, height, buf).context("Decoded frame has unexpected size")
}

impl VideoReader for FfmpegReader {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return self.convert().map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("Failed to decode packet")?,
                None => {
                    self.decoder.send_eof().context("Failed to flush decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}
