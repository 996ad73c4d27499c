use std::path::Path;

use anyhow::Context as _;
use ffmpeg::format::{context::Output, Pixel};
use ffmpeg::software::scaling::{context::Context, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Rational;
use image::RgbImage;

use crate::codec::VideoWriter;
use crate::plane::copy_plane;

/// Encodes rgb24 frames into a video file at a constant frame rate.
pub struct FfmpegWriter {
    octx: Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: Context,
    rgb: Video,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    frames: i64,
}

impl FfmpegWriter {
    /// Frames passed to [`VideoWriter::write_frame`] must be `width` x
    /// `height`. yuv420p needs even dimensions, so an odd last column or
    /// row is cropped from the encoded output.
    pub fn create(
        encoder_name: &str,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> anyhow::Result<Self> {
        let (enc_width, enc_height) = (width & !1, height & !1);
        if enc_width == 0 || enc_height == 0 {
            anyhow::bail!("Cannot encode {width}x{height} frames");
        }
        if !(fps.is_finite() && fps > 0.0) {
            anyhow::bail!("Invalid frame rate {fps}");
        }
        let codec = ffmpeg::encoder::find_by_name(encoder_name)
            .with_context(|| format!("Encoder {encoder_name} is not available"))?;

        let mut octx = ffmpeg::format::output(&output)
            .with_context(|| format!("Failed to create {output:?}"))?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let rate = Rational::from(fps);
        let time_base = rate.invert();
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(enc_width);
        encoder.set_height(enc_height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_frame_rate(Some(rate));
        encoder.set_time_base(time_base);
        if global_header {
            encoder.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .with_context(|| format!("Failed to open encoder {encoder_name}"))?;

        let stream_index = {
            let mut stream = octx.add_stream(codec)?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        octx.write_header()
            .with_context(|| format!("Failed to write header of {output:?}"))?;
        // the muxer may pick its own time base while writing the header
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .context("Output stream missing after header")?;

        let scaler = Context::get(
            Pixel::RGB24,
            enc_width,
            enc_height,
            Pixel::YUV420P,
            enc_width,
            enc_height,
            Flags::BILINEAR,
        )?;
        log::debug!("Encoding {enc_width}x{enc_height}@{fps} with {encoder_name} into {output:?}");

        Ok(Self {
            octx,
            encoder,
            scaler,
            rgb: Video::new(Pixel::RGB24, enc_width, enc_height),
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            width,
            height,
            frames: 0,
        })
    }

    fn write_packets(&mut self) -> anyhow::Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .context("Failed to write packet")?;
        }
        Ok(())
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            anyhow::bail!(
                "Frame is {:?}, writer expects {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            );
        }
        let stride = self.rgb.stride(0);
        let row_len = self.rgb.width() as usize * 3;
        let rows = self.rgb.height() as usize;
        copy_plane(
            frame.as_raw(),
            self.width as usize * 3,
            self.rgb.data_mut(0),
            stride,
            row_len,
            rows,
        );

        let mut yuv = Video::empty();
        self.scaler
            .run(&self.rgb, &mut yuv)
            .context("Failed to convert frame to yuv420p")?;
        yuv.set_pts(Some(self.frames));
        self.encoder
            .send_frame(&yuv)
            .with_context(|| format!("Failed to encode frame {}", self.frames))?;
        self.frames += 1;
        self.write_packets()
    }

    fn finish(mut self: Box<Self>) -> anyhow::Result<()> {
        self.encoder.send_eof().context("Failed to flush encoder")?;
        self.write_packets()?;
        self.octx.write_trailer().context("Failed to write trailer")?;
        log::debug!("Encoded {} frames", self.frames);
        Ok(())
    }
}
