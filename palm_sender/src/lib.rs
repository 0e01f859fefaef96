//! Client for the palm server.
//!
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use common::{
    data_url::DataUrl,
    report::{CameraCapture, DetectionReport},
};
use reqwest::{multipart, Client, Response};
use serde::Deserialize;

/// How images are handed to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    /// Multipart file upload.
    Upload,
    /// `data:` URL, as sent by the browser camera.
    Camera,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct PalmClient {
    client: Client,
    base_url: String,
}

impl PalmClient {
    /// Create a client for a server at `host:port` or a full `http(s)://` URL.
    pub fn new(address: &str) -> Self {
        let address = address.trim_end_matches('/');
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_owned()
        } else {
            format!("http://{}", address)
        };

        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Send an image file and return the detection report.
    pub async fn detect_file(&self, path: &Path, mode: SendMode) -> Result<DetectionReport> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mime = mime_for(path);

        match mode {
            SendMode::Upload => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".into());
                self.upload(file_name, mime, data).await
            }
            SendMode::Camera => self.send_capture(mime, &data).await,
        }
    }

    pub async fn upload(
        &self,
        file_name: String,
        mime: &str,
        data: Vec<u8>,
    ) -> Result<DetectionReport> {
        let part = multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime)?;
        let form = multipart::Form::new().part("image", part);

        let resp = self
            .client
            .post(format!("{}/api/detect", self.base_url))
            .multipart(form)
            .send()
            .await?;

        parse_report(resp).await
    }

    pub async fn send_capture(&self, mime: &str, data: &[u8]) -> Result<DetectionReport> {
        let capture = CameraCapture {
            data_url: DataUrl::encode(mime, data),
        };

        let resp = self
            .client
            .post(format!("{}/api/detect_camera", self.base_url))
            .json(&capture)
            .send()
            .await?;

        parse_report(resp).await
    }

    /// Fetch the annotated image of a report.
    pub async fn download(&self, report: &DetectionReport) -> Result<Bytes> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, report.download_url))
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(resp.bytes().await?)
    }
}

async fn parse_report(resp: Response) -> Result<DetectionReport> {
    let resp = check_status(resp).await?;
    Ok(resp.json().await?)
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned(),
    };
    bail!("server responded {}: {}", status.as_u16(), message)
}

fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// File name of the annotated copy of `path`.
pub fn output_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    format!("{}_detected.png", stem)
}
