use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::routing::{get, post};
use axum::Router;
use ffmpeg_common::codec::VideoCodec;
use inference_common::detector::Inference;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Settings;
use crate::error::ServerError;
use crate::frame_buffer::FrameBuffer;
use crate::mjpeg::{self, StreamClients};
use crate::persist::OutputDir;
use crate::upload;

/// Process-wide state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub frames: FrameBuffer,
    pub clients: StreamClients,
    pub inference: Inference,
    pub codec: Arc<dyn VideoCodec>,
    pub output: OutputDir,
    pub settings: Arc<Settings>,
}

impl AppContext {
    /// Creates the output directory and an empty frame buffer.
    pub fn new(
        settings: Settings,
        inference: Inference,
        codec: Arc<dyn VideoCodec>,
    ) -> anyhow::Result<Self> {
        let output = OutputDir::create(&settings.upload.output_dir)?;
        let frames = FrameBuffer::new(inference.clone(), &settings.stream);
        Ok(Self {
            frames,
            clients: StreamClients::default(),
            inference,
            codec,
            output,
            settings: Arc::new(settings),
        })
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.settings
            .upload
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(uri.path().to_string())
}

pub fn router(ctx: AppContext) -> Router {
    let upload_limit = ctx.settings.server.upload_limit;
    Router::new()
        .route("/stream", get(mjpeg::stream).fallback(not_found))
        .route(
            "/upload/image",
            post(upload::upload_image).fallback(not_found),
        )
        .route(
            "/upload/video",
            post(upload::upload_video).fallback(not_found),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serves until `shutdown` resolves. The frame buffer is closed first so
/// open streams finish and the graceful shutdown can complete.
pub async fn serve<F>(ctx: AppContext, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let frames = ctx.frames.clone();
    let app = router(ctx);
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutting down, closing live streams");
        frames.close();
    })
    .await
    .context("Server error")
}
