//! Synchronous batch annotation of uploaded images and videos.
//!
//! Uploads bypass the frame buffer entirely. Decode, detection and encode
//! run on the blocking pool with the full detector profile.

use std::fs;
use std::io::Write;
use std::time::Instant;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;
use inference_common::detection::DetectionCounts;
use inference_common::detector::Profile;
use inference_common::frame_times::{AggregatedTimes, FrameTimes};
use inference_common::jpeg;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::VideoResponseMode;
use crate::error::{ServerError, ServerResult};
use crate::persist::RemoveOnDrop;
use crate::server::AppContext;

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub message: &'static str,
    pub image_data: String,
    pub class_counts: DetectionCounts,
}

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub message: &'static str,
    pub video_data: String,
}

async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Upload worker panicked")?
}

/// `POST /upload/image`
pub async fn upload_image(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> ServerResult<Json<ImageResponse>> {
    if body.is_empty() {
        return Err(ServerError::bad_request("Empty image upload"));
    }
    let response = run_blocking(move || process_image(&ctx, &body)).await?;
    Ok(Json(response))
}

/// `POST /upload/video`
pub async fn upload_video(State(ctx): State<AppContext>, body: Bytes) -> ServerResult<Response> {
    if body.is_empty() {
        return Err(ServerError::bad_request("Empty video upload"));
    }
    let mode = ctx.settings.upload.video_response;
    let video = run_blocking(move || process_video(&ctx, &body)).await?;
    let response = match mode {
        VideoResponseMode::Raw => ([(header::CONTENT_TYPE, "video/mp4")], video).into_response(),
        VideoResponseMode::Json => Json(VideoResponse {
            message: "Video processed",
            video_data: STANDARD.encode(&video),
        })
        .into_response(),
    };
    Ok(response)
}

pub fn process_image(ctx: &AppContext, body: &[u8]) -> ServerResult<ImageResponse> {
    let stem = format!("upload-{}", Uuid::new_v4());
    let mut times = FrameTimes::default();

    let start = Instant::now();
    let image = jpeg::decode(body).map_err(|e| ServerError::bad_request(format!("{e:#}")))?;
    times.decode = start.elapsed();

    let annotated = ctx
        .inference
        .infer_on_image(image, Profile::Full, &mut times)
        .context("Detection failed")?;

    let start = Instant::now();
    let quality = ctx.settings.upload.jpeg_quality;
    let (path, bytes) = ctx.output.save_image(&annotated.image, &stem, quality)?;
    times.encode = start.elapsed();

    let class_counts = annotated.counts();
    info!(
        "Annotated image {path:?}: {} detections in {:?}",
        class_counts.total(),
        times.total()
    );
    debug!("{times:?}");
    Ok(ImageResponse {
        message: "Image processed",
        image_data: STANDARD.encode(&bytes),
        class_counts,
    })
}

/// Annotates every frame in order and returns the encoded result. Both the
/// uploaded copy and the annotated file are removed before returning.
pub fn process_video(ctx: &AppContext, body: &[u8]) -> ServerResult<Vec<u8>> {
    let temp_dir = ctx.temp_dir();
    let mut input = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".mp4")
        .tempfile_in(&temp_dir)
        .with_context(|| format!("Failed to create temporary file in {temp_dir:?}"))?;
    input
        .write_all(body)
        .and_then(|()| input.flush())
        .context("Failed to store upload")?;

    let stem = input
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("upload-{}", Uuid::new_v4()));
    let output = RemoveOnDrop::new(ctx.output.annotated_path(&stem, "mp4"));

    let mut reader = ctx
        .codec
        .open(input.path())
        .map_err(|e| ServerError::bad_request(format!("Unreadable video: {e:#}")))?;
    let source = reader.info();
    debug!(
        "Decoding {stem}: {}x{} at {:.2} fps, {} frames",
        source.width,
        source.height,
        source.fps,
        source
            .frame_count
            .map_or_else(|| "unknown".to_string(), |n| n.to_string())
    );
    let start = Instant::now();
    let first = match reader.read_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(ServerError::bad_request("Video contains no frames")),
        Err(e) => return Err(ServerError::bad_request(format!("Unreadable video: {e:#}"))),
    };
    let mut decode = start.elapsed();

    let (width, height) = first.dimensions();
    let fps = ctx.settings.upload.video_fps;
    let mut writer = ctx.codec.create(output.path(), width, height, fps)?;

    let mut times = AggregatedTimes::default();
    let mut next = Some(first);
    let mut index = 0usize;
    while let Some(frame) = next {
        let mut frame_times = FrameTimes {
            decode,
            ..Default::default()
        };
        let annotated = ctx
            .inference
            .infer_on_image(DynamicImage::ImageRgb8(frame), Profile::Full, &mut frame_times)
            .with_context(|| format!("Detection failed on frame {index}"))?;

        let start = Instant::now();
        writer
            .write_frame(&annotated.image)
            .with_context(|| format!("Failed to encode frame {index}"))?;
        frame_times.encode = start.elapsed();
        times.push(frame_times);

        index += 1;
        let start = Instant::now();
        next = reader
            .read_frame()
            .with_context(|| format!("Failed to decode frame {index}"))?;
        decode = start.elapsed();
    }
    writer.finish()?;

    let video = fs::read(output.path())
        .with_context(|| format!("Failed to read back {:?}", output.path()))?;
    let avg = times.avg(true);
    info!(
        "Annotated video: {index} frames {width}x{height}@{fps}, avg {:?}/frame (forward {:?})",
        avg.total(),
        avg.forward_pass
    );
    Ok(video)
}
