//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path,
    },
    http::header,
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Json, Router,
};
use common::{
    data_url::DataUrl,
    report::{CameraCapture, DetectionReport, ImageSource},
};
use image::{DynamicImage, ImageFormat};

use crate::{
    error::ApiError,
    inferer::InfererHandle,
    store::{ResultStore, StoredResult},
};

const INDEX_HTML: &str = include_str!("../resources/index.html");

/// Name of the multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

/// File name offered when downloading an annotated image.
pub const DOWNLOAD_FILE_NAME: &str = "detection_result.png";

/// State shared by all handlers.
pub struct AppState {
    pub inferer: InfererHandle,
    pub store: ResultStore,
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/api/detect", post(detect_upload))
        .route("/api/detect_camera", post(detect_camera))
        .route("/api/results/:id", get(result_report))
        .route("/results/:id/image", get(result_image))
        .route("/results/:id/download", get(result_download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(Extension(state))
}

/// The page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Detect objects in an uploaded JPEG or PNG.
pub async fn detect_upload(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionReport>, ApiError> {
    let mut multipart = multipart?;

    let mut data = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            log::debug!("Receiving upload {:?}", field.file_name());
            data = Some(field.bytes().await?);
            break;
        }
    }
    let data = data.ok_or_else(|| {
        ApiError::BadRequest(format!("missing form field `{}`", IMAGE_FIELD))
    })?;

    let image = decode_image(&data)?;
    run_detection(&state, image, ImageSource::Upload).await
}

/// Detect objects in a frame captured by the browser camera.
pub async fn detect_camera(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CameraCapture>, JsonRejection>,
) -> Result<Json<DetectionReport>, ApiError> {
    let Json(capture) = payload?;

    let data_url = DataUrl::parse(&capture.data_url)
        .map_err(|e| ApiError::BadRequest(format!("invalid camera image: {}", e)))?;
    log::debug!(
        "Receiving camera frame ({}, {} bytes)",
        data_url.mime,
        data_url.data.len()
    );

    let image = decode_image(&data_url.data)?;
    run_detection(&state, image, ImageSource::Camera).await
}

/// Report of an earlier detection.
pub async fn result_report(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DetectionReport>, ApiError> {
    let stored = lookup(&state, id)?;
    Ok(Json(stored.report))
}

/// Annotated image, displayed inline.
pub async fn result_image(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = lookup(&state, id)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], stored.png))
}

/// Annotated image as a file download.
pub async fn result_download(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = lookup(&state, id)?;
    let headers = [
        (header::CONTENT_TYPE, "image/png".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", DOWNLOAD_FILE_NAME),
        ),
    ];

    Ok((headers, stored.png))
}

fn lookup(state: &AppState, id: String) -> Result<StoredResult, ApiError> {
    state.store.get(&id).ok_or(ApiError::NotFound(id))
}

/// Decode a JPEG or PNG image.
fn decode_image(data: &[u8]) -> Result<DynamicImage, ApiError> {
    let format = image::guess_format(data)
        .map_err(|_| ApiError::BadRequest("unrecognized image format".into()))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(ApiError::BadRequest(format!(
            "unsupported image format {:?}, expected JPEG or PNG",
            format
        )));
    }

    image::load_from_memory_with_format(data, format)
        .map_err(|e| ApiError::BadRequest(format!("failed to decode image: {}", e)))
}

async fn run_detection(
    state: &AppState,
    image: DynamicImage,
    source: ImageSource,
) -> Result<Json<DetectionReport>, ApiError> {
    let outcome = state.inferer.infer(image).await.map_err(ApiError::Inference)?;

    let id = state.store.next_id();
    let report = DetectionReport {
        image_url: format!("/results/{}/image", id),
        download_url: format!("/results/{}/download", id),
        id,
        source,
        width: outcome.width,
        height: outcome.height,
        detections: outcome.detections,
        counts: outcome.counts,
    };

    let summary: Vec<String> = report
        .counts
        .iter()
        .map(|c| format!("{}={}", c.name, c.count))
        .collect();
    log::info!(
        "Result {} ({:?}, {}x{}): {} objects [{}]",
        report.id,
        source,
        report.width,
        report.height,
        report.detections.len(),
        summary.join(", ")
    );

    state.store.insert(StoredResult {
        report: report.clone(),
        png: outcome.png,
    });

    Ok(Json(report))
}
