//! `multipart/x-mixed-replace` live stream.
//!
//! Every client gets its own worker thread blocked on the frame buffer's
//! condition variable. Parts travel to the async response body through a
//! one-slot channel, so a slow client only ever holds up its own worker.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::ServerResult;
use crate::frame_buffer::FrameBuffer;
use crate::server::AppContext;

pub const BOUNDARY: &str = "FRAME";

/// How often an idle worker checks whether its client is still there.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One multipart part: boundary line, part headers, blank line, payload.
pub fn encode_part(frame: &[u8]) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + frame.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Gauge of connected stream clients.
#[derive(Debug, Clone, Default)]
pub struct StreamClients(Arc<AtomicUsize>);

impl StreamClients {
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Counts a client until the returned guard is dropped.
    fn connect(&self) -> ClientGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ClientGuard(self.0.clone())
    }
}

struct ClientGuard(Arc<AtomicUsize>);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Where a client session writes its parts.
pub trait PartSink {
    fn send(&mut self, part: Bytes) -> anyhow::Result<()>;

    /// Whether the peer is known to be gone even without a write.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Feeds an axum response body from a plain thread.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, Infallible>>) -> Self {
        Self { tx }
    }
}

impl PartSink for ChannelSink {
    fn send(&mut self, part: Bytes) -> anyhow::Result<()> {
        self.tx
            .blocking_send(Ok(part))
            .map_err(|_| anyhow::anyhow!("connection closed"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ClientSession {
    buffer: FrameBuffer,
    client: String,
    last_seen: u64,
    poll_interval: Duration,
}

impl ClientSession {
    /// Starts at the current frame: the first part sent is the next frame
    /// published after connecting.
    pub fn new(buffer: FrameBuffer, client: impl Into<String>) -> Self {
        let last_seen = buffer.sequence();
        Self {
            buffer,
            client: client.into(),
            last_seen,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Streams until the client goes away or the buffer is closed. Returns
    /// the number of parts delivered.
    pub fn run<S: PartSink>(mut self, mut sink: S) -> u64 {
        debug!("Streaming to {} from sequence {}", self.client, self.last_seen);
        let mut sent = 0;
        loop {
            match self
                .buffer
                .wait_for_next_frame_timeout(self.last_seen, self.poll_interval)
            {
                Some(frame) => {
                    self.last_seen = frame.sequence;
                    if let Err(e) = sink.send(encode_part(&frame.data)) {
                        warn!("Removed streaming client {}: {}", self.client, e);
                        break;
                    }
                    sent += 1;
                }
                None if sink.is_closed() => {
                    warn!("Removed streaming client {}: connection closed", self.client);
                    break;
                }
                None if self.buffer.is_closed() => {
                    info!("Stream to {} ended, server shutting down", self.client);
                    break;
                }
                None => {}
            }
        }
        sent
    }
}

/// `GET /stream`
pub async fn stream(
    State(ctx): State<AppContext>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> ServerResult<Response> {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".into());
    let (tx, rx) = mpsc::channel(1);
    let session = ClientSession::new(ctx.frames.clone(), client.clone());
    let guard = ctx.clients.connect();
    info!("Streaming client {client} connected, {} active", ctx.clients.active());

    thread::Builder::new()
        .name(format!("stream-{client}"))
        .spawn(move || {
            let _guard = guard;
            session.run(ChannelSink::new(tx))
        })
        .context("Failed to spawn stream worker")?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::AGE, HeaderValue::from_static("0"))
        .header(header::CACHE_CONTROL, "no-cache, private")
        .header(header::PRAGMA, "no-cache")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .context("Failed to build stream response")?;
    Ok(response)
}
