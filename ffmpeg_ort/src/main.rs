use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ffmpeg_common::camera::Camera;
use ffmpeg_ort::config::{Args, Settings};
use ffmpeg_ort::server::{self, AppContext};
use inference_common::annotate::Annotator;
use inference_common::detector::Inference;
use ort_common::yolov8::{resolve_fast_model, YoloV8};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ffmpeg_ort=info,ffmpeg_common=info,ort_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args).context("Invalid configuration")?;
    info!("{settings:?}");

    // Load model into ort.
    let ep_name = ort_common::init_runtime(settings.model.cuda);
    let fast_model = resolve_fast_model(&settings.model.path, settings.model.fast_path.clone());
    let detector = YoloV8::load(
        &settings.model.path,
        fast_model.as_deref(),
        settings.model.yolo_params(),
    )?;
    info!("Prepared ort {ep_name} session with model: {:?}", settings.model.path);

    let annotator = match &settings.model.font {
        Some(path) => Annotator::from_font_file(path)?,
        None => Annotator::new(),
    };
    let inference = Inference::new(Arc::new(detector), annotator);
    ffmpeg_common::init()?;
    let codec = Arc::new(settings.ffmpeg.clone());
    let ctx = AppContext::new(settings.clone(), inference, codec)?;
    info!("Saving annotated uploads to {:?}", ctx.output.path());

    let mut camera = if settings.camera.enabled {
        let config = settings.camera.camera_config();
        let ffmpeg = settings.ffmpeg.ffmpeg_bin.clone();
        let sink = Arc::new(ctx.frames.clone());
        let camera = tokio::task::spawn_blocking(move || Camera::start(&ffmpeg, &config, sink))
            .await?
            .context("Failed to start camera")?;
        Some(camera)
    } else {
        info!("Camera disabled, /stream stays idle");
        None
    };

    let listener = tokio::net::TcpListener::bind(settings.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address()))?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    let frames = ctx.frames.clone();
    let result = server::serve(ctx, listener, shutdown).await;

    if let Some(camera) = camera.as_mut() {
        camera.stop();
    }
    frames.close();
    let stats = frames.stats();
    info!(
        "Live stream: {} frames, {} inference jobs ({} failed), avg {:?}, max {:?}",
        stats.frames_written,
        stats.jobs_completed,
        stats.jobs_failed,
        stats.avg_times.total(),
        stats.max_times.total()
    );
    result
}
