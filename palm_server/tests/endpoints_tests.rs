use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{
    data_url::DataUrl,
    detection::{BBox, Detection},
    report::{CameraCapture, DetectionReport, ImageSource},
};
use image::{Rgb, RgbImage};
use palm_server::{
    annotate::{encode_png, Annotator},
    endpoints::{router, AppState},
    inferer::Inferer,
    nn::InferModel,
    store::ResultStore,
};
use tower::ServiceExt;

const BOUNDARY: &str = "palmboundary";

/// Finds two ripe bunches and one unripe bunch in every image.
struct FakeModel;

impl InferModel for FakeModel {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let detection = |x1: f32, class_id: usize, label: &str, confidence: f32| Detection {
            bbox: BBox::new(x1, 0.0, x1 + w / 4.0, h / 2.0),
            class_id,
            label: label.into(),
            confidence,
        };

        Ok(vec![
            detection(0.0, 3, "ripe", 0.9),
            detection(w / 4.0, 5, "unripe", 0.8),
            detection(w / 2.0, 3, "ripe", 0.7),
        ])
    }
}

fn app(max_upload_bytes: usize) -> Result<Router> {
    let inferer = Inferer::spawn(Arc::new(FakeModel), Annotator::new(None, 2), 4)?;
    let state = Arc::new(AppState {
        inferer,
        store: ResultStore::new(8),
    });

    Ok(router(state, max_upload_bytes))
}

fn test_png() -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(64, 48, Rgb([120, 80, 40]));
    Ok(encode_png(&image)?.to_vec())
}

fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    [
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
        data,
        format!("\r\n--{BOUNDARY}--\r\n").as_bytes(),
    ]
    .concat()
}

fn upload_request(body: Vec<u8>) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri("/api/detect")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))?)
}

fn camera_request(data_url: String) -> Result<Request<Body>> {
    let body = serde_json::to_vec(&CameraCapture { data_url })?;
    Ok(Request::builder()
        .method("POST")
        .uri("/api/detect_camera")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

async fn body_bytes(response: axum::response::Response) -> Result<Vec<u8>> {
    Ok(hyper::body::to_bytes(response.into_body()).await?.to_vec())
}

async fn error_message(response: axum::response::Response) -> Result<String> {
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    Ok(body["error"].as_str().unwrap_or_default().to_owned())
}

#[tokio::test]
async fn test_healthcheck_and_index() -> Result<()> {
    let app = app(1 << 20)?;

    let response = app.clone().oneshot(get("/healthcheck")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await?, b"healthy");

    let response = app.oneshot(get("/")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let page = String::from_utf8(body_bytes(response).await?)?;
    assert!(page.contains("getUserMedia"));
    assert!(page.contains("/api/detect_camera"));

    Ok(())
}

#[tokio::test]
async fn test_upload_detect_and_download() -> Result<()> {
    let app = app(1 << 20)?;
    let body = multipart_body("image", "palm.png", "image/png", &test_png()?);

    let response = app.clone().oneshot(upload_request(body)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report: DetectionReport = serde_json::from_slice(&body_bytes(response).await?)?;

    assert_eq!(report.source, ImageSource::Upload);
    assert_eq!((report.width, report.height), (64, 48));
    assert_eq!(report.detections.len(), 3);
    assert_eq!(report.counts.get("ripe"), Some(2));
    assert_eq!(report.counts.get("unripe"), Some(1));
    assert_eq!(report.counts.iter().next().map(|c| c.name.as_str()), Some("ripe"));

    // Stored report
    let response = app
        .clone()
        .oneshot(get(&format!("/api/results/{}", report.id))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stored: DetectionReport = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(stored, report);

    // Inline image
    let response = app.clone().oneshot(get(&report.image_url)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let annotated = image::load_from_memory(&body_bytes(response).await?)?.to_rgb8();
    assert_eq!(annotated.dimensions(), (64, 48));
    assert_eq!(annotated[(0, 0)], palm_server::labels::class_color(3));

    // Download
    let response = app.oneshot(get(&report.download_url)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str()?;
    assert_eq!(disposition, "attachment; filename=\"detection_result.png\"");

    Ok(())
}

#[tokio::test]
async fn test_camera_capture() -> Result<()> {
    let app = app(1 << 20)?;
    let data_url = DataUrl::encode("image/png", &test_png()?);

    let response = app.oneshot(camera_request(data_url)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report: DetectionReport = serde_json::from_slice(&body_bytes(response).await?)?;

    assert_eq!(report.source, ImageSource::Camera);
    assert_eq!(report.counts.total(), 3);
    Ok(())
}

#[tokio::test]
async fn test_camera_rejects_bad_data_url() -> Result<()> {
    let app = app(1 << 20)?;

    let response = app
        .clone()
        .oneshot(camera_request("hello".into())?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await?.contains("not an image data URL"));

    let response = app
        .oneshot(camera_request("data:image/png;base64,!!!".into())?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await?.contains("invalid base64"));

    Ok(())
}

#[tokio::test]
async fn test_upload_rejects_bad_input() -> Result<()> {
    let app = app(1 << 20)?;

    // Wrong field name
    let body = multipart_body("file", "palm.png", "image/png", &test_png()?);
    let response = app.clone().oneshot(upload_request(body)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await?.contains("missing form field"));

    // Not an image
    let body = multipart_body("image", "notes.txt", "text/plain", b"just some text");
    let response = app.clone().oneshot(upload_request(body)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unsupported format
    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    let body = multipart_body("image", "palm.gif", "image/gif", gif);
    let response = app.clone().oneshot(upload_request(body)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await?.contains("expected JPEG or PNG"));

    // Truncated PNG
    let png = test_png()?;
    let body = multipart_body("image", "palm.png", "image/png", &png[..png.len() / 2]);
    let response = app.oneshot(upload_request(body)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_unknown_result() -> Result<()> {
    let app = app(1 << 20)?;

    for uri in [
        "/api/results/nope",
        "/results/nope/image",
        "/results/nope/download",
    ] {
        let response = app.clone().oneshot(get(uri)?).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    Ok(())
}

#[tokio::test]
async fn test_body_limit() -> Result<()> {
    let app = app(1024)?;
    let data_url = DataUrl::encode("image/png", &vec![0_u8; 4096]);

    let response = app.oneshot(camera_request(data_url)?).await?;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    Ok(())
}
