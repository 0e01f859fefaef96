//! Drawing detections onto images.
//!
//! Every detection gets a hollow box in the color of its ripeness class. When a font is
//! available, a filled tab with `<label> <confidence>` is drawn on top of the box.
use std::{fs, path::Path};

use anyhow::{Context, Result};
use bytes::Bytes;
use common::detection::Detection;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::labels::class_color;

/// Fonts tried when no font is given on the command line.
const FONT_CANDIDATES: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MIN_FONT_SIZE: f32 = 12.0;

pub struct Annotator {
    font: Option<Font<'static>>,
    line_width: u32,
}

impl Annotator {
    pub fn new(font: Option<Font<'static>>, line_width: u32) -> Self {
        Self {
            font,
            line_width: line_width.max(1),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw bounding boxes with labels and confidence scores on a copy of the image.
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut frame = image.clone();
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return frame;
        }

        // Text grows with the image so labels stay readable on large photos
        let font_size = f32::max(MIN_FONT_SIZE, width.min(height) as f32 / 40.0);
        let scale = Scale::uniform(font_size);

        for detection in detections {
            let color = class_color(detection.class_id);
            let bbox = detection.bbox.clamp_to(width as f32, height as f32);

            // Keep at least one pixel so degenerate boxes remain visible
            let x = (bbox.x1.round() as i32).min(width as i32 - 1);
            let y = (bbox.y1.round() as i32).min(height as i32 - 1);
            let rect_width = (bbox.width().round() as u32).max(1);
            let rect_height = (bbox.height().round() as u32).max(1);

            for t in 0..self.line_width {
                let inner_width = rect_width as i64 - 2 * t as i64;
                let inner_height = rect_height as i64 - 2 * t as i64;
                if inner_width <= 0 || inner_height <= 0 {
                    break;
                }
                let rect = Rect::at(x + t as i32, y + t as i32)
                    .of_size(inner_width as u32, inner_height as u32);
                draw_hollow_rect_mut(&mut frame, rect, color);
            }

            if let Some(font) = &self.font {
                let text = format!("{} {:.2}", detection.label, detection.confidence);
                let padding = (font_size / 6.0).ceil() as i32;
                let (text_width, text_height) = text_size(scale, font, &text);
                let tab_width = (text_width + 2 * padding).max(1);
                let tab_height = (text_height + 2 * padding).max(1);

                // Above the box, or inside it when the box touches the top edge
                let tab_y = if y - tab_height >= 0 { y - tab_height } else { y };

                let tab = Rect::at(x, tab_y).of_size(tab_width as u32, tab_height as u32);
                draw_filled_rect_mut(&mut frame, tab, color);
                draw_text_mut(
                    &mut frame,
                    TEXT_COLOR,
                    x + padding,
                    tab_y + padding,
                    scale,
                    font,
                    &text,
                );
            }
        }

        frame
    }
}

/// Load a TrueType font from `path`, or from well-known system locations.
///
/// Returns `Ok(None)` if no path is given and no system font is found.
pub fn load_font(path: Option<&Path>) -> Result<Option<Font<'static>>> {
    if let Some(path) = path {
        let data =
            fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
        let font = Font::try_from_vec(data)
            .with_context(|| format!("{} is not a valid TrueType font", path.display()))?;
        return Ok(Some(font));
    }

    for candidate in FONT_CANDIDATES {
        if let Ok(data) = fs::read(candidate) {
            if let Some(font) = Font::try_from_vec(data) {
                log::debug!("Using font {}", candidate);
                return Ok(Some(font));
            }
        }
    }

    Ok(None)
}

/// Encode an image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Bytes> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;

    Ok(Bytes::from(buf))
}
