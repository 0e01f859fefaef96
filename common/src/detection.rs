//! Detections as produced by the model and sent over the wire.
//!
use serde::{Deserialize, Serialize};

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Axis-aligned bounding box in pixel coordinates of the source image.
///
/// The coordinate frame basis is the top-left corner of the image. `(x1, y1)` is the top-left
/// and `(x2, y2)` the bottom-right point of the box.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from its center point and size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area enclosed by the box.
    ///
    /// If the box is ill-defined by having the bottom-right point above/to the left of the
    /// top-left point, the area is zero.
    pub fn area(&self) -> f32 {
        let (width, height) = (self.width(), self.height());
        if width < 0.0 || height < 0.0 {
            return 0.0;
        }

        width * height
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        // If the boxes do not overlap, the corner points of the overlap box are ill defined and
        // its area is zero.
        let overlap = BBox {
            x1: f32::max(self.x1, other.x1),
            y1: f32::max(self.y1, other.y1),
            x2: f32::min(self.x2, other.x2),
            y2: f32::min(self.y2, other.y2),
        };
        let overlap_area = overlap.area();

        overlap_area / (self.area() + other.area() - overlap_area + EPS)
    }

    /// Clamp all coordinates into `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> BBox {
        BBox {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

/// One model output: a bounding box, a ripeness class and a confidence score.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}
