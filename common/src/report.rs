//! Request and response bodies of the detection API.
//!
use serde::{Deserialize, Serialize};

use crate::{counts::ClassCounts, detection::Detection};

/// Where an image came from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Upload,
    Camera,
}

/// Result of running detection on one image.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectionReport {
    pub id: String,
    pub source: ImageSource,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub counts: ClassCounts,
    /// Annotated image, inline.
    pub image_url: String,
    /// Annotated image as attachment.
    pub download_url: String,
}

/// Frame captured by the browser camera.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CameraCapture {
    pub data_url: String,
}
