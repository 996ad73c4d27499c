use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ffmpeg_ort::config::{Settings, VideoResponseMode};
use ffmpeg_ort::server::{router, AppContext};
use serde_json::Value;
use tokio_stream::StreamExt;
use tower::ServiceExt;

#[allow(dead_code)]
#[path = "../src/test_support.rs"]
mod test_support;

use test_support::{inference, tagged_video, Counting, TagCodec};

struct TestServer {
    _dir: tempfile::TempDir,
    ctx: AppContext,
    app: Router,
}

fn server(mode: VideoResponseMode) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.upload.output_dir = dir.path().join("out");
    settings.upload.temp_dir = Some(dir.path().to_path_buf());
    settings.upload.video_response = mode;
    let ctx = AppContext::new(settings, inference(Counting::default()), Arc::new(TagCodec)).unwrap();
    let app = router(ctx.clone());
    TestServer {
        _dir: dir,
        ctx,
        app,
    }
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    test_support::jpeg_frame(width, height, 80).to_vec()
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");

    let response = server
        .app
        .oneshot(post("/stream", Vec::new()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn image_upload_returns_annotated_jpeg_and_counts() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .oneshot(post("/upload/image", jpeg(32, 24)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["message"], "Image processed");
    assert_eq!(json["class_counts"]["person"], 1);
    let image_data = STANDARD
        .decode(json["image_data"].as_str().unwrap())
        .unwrap();
    let decoded = inference_common::jpeg::decode(&image_data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));

    let saved: Vec<_> = std::fs::read_dir(server.ctx.output.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with("_annotated.jpg"));
}

#[tokio::test]
async fn bad_image_uploads_are_400() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .clone()
        .oneshot(post("/upload/image", Vec::new()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .app
        .oneshot(post("/upload/image", b"not an image".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "bad_request");
}

#[tokio::test]
async fn video_upload_returns_frames_in_order() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .oneshot(post("/upload/video", tagged_video(&[1, 2, 3, 4, 5])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], &tagged_video(&[1, 2, 3, 4, 5])[..]);

    // upload and annotated copy are both gone
    assert_eq!(std::fs::read_dir(server.ctx.output.path()).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(server._dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn video_upload_json_mode() {
    let server = server(VideoResponseMode::Json);
    let response = server
        .app
        .oneshot(post("/upload/video", tagged_video(&[7, 8])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["message"], "Video processed");
    let video = STANDARD
        .decode(json["video_data"].as_str().unwrap())
        .unwrap();
    assert_eq!(video, tagged_video(&[7, 8]));
}

#[tokio::test]
async fn empty_or_unknown_videos_are_400() {
    let server = server(VideoResponseMode::Raw);
    for body in [tagged_video(&[]), b"RIFF....".to_vec()] {
        let response = server
            .app
            .clone()
            .oneshot(post("/upload/video", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn stream_sends_multipart_jpeg_parts() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .oneshot(Request::builder().uri("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=FRAME"
    );
    assert_eq!(headers[header::AGE], "0");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, private");
    assert_eq!(headers[header::PRAGMA], "no-cache");

    server.ctx.frames.write(jpeg(16, 16).into());

    let mut body = response.into_body().into_data_stream();
    let part = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("no part within 5s")
        .unwrap()
        .unwrap();
    // first part is the raw frame or, if the job already finished, its
    // annotated replacement
    let head_end = part
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap()
        + 4;
    let head = std::str::from_utf8(&part[..head_end]).unwrap();
    assert!(head.starts_with("--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: "));
    let length: usize = head
        .trim_end()
        .rsplit(' ')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(part.len(), head_end + length + 2);
    assert_eq!(&part[head_end..head_end + 2], &[0xFF, 0xD8]);
    assert!(part.ends_with(b"\r\n"));

    drop(body);
    server.ctx.frames.close();
}

#[tokio::test]
async fn dropped_stream_body_ends_its_worker() {
    let server = server(VideoResponseMode::Raw);
    let response = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(server.ctx.clients.active(), 1);

    server.ctx.frames.write(jpeg(16, 16).into());
    let mut body = response.into_body().into_data_stream();
    tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("no part within 5s")
        .unwrap()
        .unwrap();
    drop(body);

    // the worker notices on its next write or poll
    let deadline = Instant::now() + Duration::from_secs(10);
    while server.ctx.clients.active() > 0 && Instant::now() < deadline {
        server.ctx.frames.write(jpeg(16, 16).into());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.ctx.clients.active(), 0);
    assert!(!server.ctx.frames.is_closed());
    server.ctx.frames.close();
}
