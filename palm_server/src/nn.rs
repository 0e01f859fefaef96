//! Object detection with a YOLO network exported to ONNX.
//!
//! The network takes a square `[1, 3, S, S]` RGB input in `[0, 1]` and produces
//! `[1, 4 + C, N]` candidates: box center, box size and one score per class.
use std::path::Path;

use anyhow::{bail, Context, Result};
use common::detection::{BBox, Detection};
use image::{imageops, Rgb, RgbImage};
use ndarray::{s, ArrayView2, Axis, Ix3};
use tract_onnx::prelude::*;

use crate::labels::Labels;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Gray value of the letterbox padding.
const PAD_VALUE: u8 = 114;

pub trait InferModel: Send + Sync {
    /// Detect objects in an image. Boxes are in pixel coordinates of `image`.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Tuning knobs of the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloParams {
    pub input_size: u32,
    pub min_confidence: f32,
    pub max_iou: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.25,
            max_iou: 0.45,
            max_detections: 300,
        }
    }
}

pub struct YoloModel {
    model: NnModel,
    labels: Labels,
    params: YoloParams,
}

impl YoloModel {
    /// Load and optimize the network.
    ///
    /// Class names come from `labels` if given, otherwise from the `names` metadata of the ONNX
    /// file, otherwise from the built-in ripeness classes.
    pub fn load(
        path: impl AsRef<Path>,
        params: YoloParams,
        labels: Option<Labels>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let onnx = tract_onnx::onnx();
        let proto = onnx
            .proto_model_for_path(path)
            .with_context(|| format!("failed to read model {}", path.display()))?;

        let names = proto
            .metadata_props
            .iter()
            .find(|prop| prop.key == "names")
            .map(|prop| prop.value.as_str());
        let labels = Labels::resolve(labels, names);

        let size = params.input_size as usize;
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
        let model = onnx
            .model_for_proto_model(&proto)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!(
            "Loaded model {} ({}x{} input, {} classes)",
            path.display(),
            size,
            size,
            labels.len()
        );

        Ok(Self {
            model,
            labels,
            params,
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    fn preproc(&self, input: &RgbImage) -> (Tensor, Letterbox) {
        let size = self.params.input_size;
        let letterbox = Letterbox::new(input.width(), input.height(), size);

        let resized = imageops::resize(
            input,
            letterbox.width,
            letterbox.height,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.offset_x as i64,
            letterbox.offset_y as i64,
        );

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| canvas[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into();

        (tensor, letterbox)
    }
}

impl InferModel for YoloModel {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        if image.width() == 0 || image.height() == 0 {
            bail!("image has no pixels");
        }

        let (input, letterbox) = self.preproc(image);
        let raw_nn_out = self.model.run(tvec!(input.into()))?;
        let Some(output) = raw_nn_out.first() else {
            bail!("model produced no output");
        };

        decode_predictions(
            output,
            &letterbox,
            (image.width(), image.height()),
            &self.params,
            &self.labels,
        )
    }
}

/// Aspect-preserving fit of an image into the square network input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    /// Size of the resized image inside the square.
    pub width: u32,
    pub height: u32,
    /// Top-left corner of the resized image inside the square.
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn new(src_width: u32, src_height: u32, size: u32) -> Self {
        let scale = f32::min(
            size as f32 / src_width as f32,
            size as f32 / src_height as f32,
        );
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, size);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, size);

        Self {
            scale,
            width,
            height,
            offset_x: (size - width) / 2,
            offset_y: (size - height) / 2,
        }
    }

    /// Map a box from network input coordinates back to source image coordinates.
    pub fn unmap(&self, bbox: BBox) -> BBox {
        let (ox, oy) = (self.offset_x as f32, self.offset_y as f32);
        BBox {
            x1: (bbox.x1 - ox) / self.scale,
            y1: (bbox.y1 - oy) / self.scale,
            x2: (bbox.x2 - ox) / self.scale,
            y2: (bbox.y2 - oy) / self.scale,
        }
    }
}

/// Turn the raw network output into labelled detections in source image coordinates.
pub fn decode_predictions(
    output: &Tensor,
    letterbox: &Letterbox,
    (width, height): (u32, u32),
    params: &YoloParams,
    labels: &Labels,
) -> Result<Vec<Detection>> {
    let view = output
        .to_array_view::<f32>()?
        .into_dimensionality::<Ix3>()
        .with_context(|| format!("unexpected output shape {:?}", output.shape()))?;
    let view = view.index_axis(Axis(0), 0);

    // Candidates are columns of `[4 + C, N]`. Some exports emit `[N, 4 + C]` instead.
    let view = match output_orientation(view.nrows(), view.ncols(), labels.len()) {
        Orientation::Columns => view,
        Orientation::Rows => view.reversed_axes(),
    };
    if view.nrows() < 5 {
        bail!("unexpected output shape {:?}", output.shape());
    }

    let candidates = best_class_candidates(view, params.min_confidence)
        .into_iter()
        .map(|(bbox, class_id, confidence)| {
            let bbox = letterbox
                .unmap(bbox)
                .clamp_to(width as f32, height as f32);
            (bbox, class_id, confidence)
        })
        .filter(|(bbox, _, _)| bbox.area() > 0.0)
        .collect();

    let selected = non_maximum_suppression(candidates, params.max_iou);

    Ok(selected
        .into_iter()
        .take(params.max_detections)
        .map(|(bbox, class_id, confidence)| Detection {
            bbox,
            class_id,
            label: labels.name(class_id),
            confidence,
        })
        .collect())
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Orientation {
    /// `[4 + C, N]`, one candidate per column.
    Columns,
    /// `[N, 4 + C]`, one candidate per row.
    Rows,
}

/// Decide how candidates are laid out in a 2D output.
///
/// The known class count decides first. Only when it matches neither axis, e.g. labels that do not
/// fit the model, the longer axis is taken as the candidate axis.
fn output_orientation(nrows: usize, ncols: usize, num_classes: usize) -> Orientation {
    let attributes = 4 + num_classes;
    if nrows == attributes {
        Orientation::Columns
    } else if ncols == attributes {
        Orientation::Rows
    } else if nrows > ncols {
        Orientation::Rows
    } else {
        Orientation::Columns
    }
}

/// Pick the best class of every candidate column and keep those above `min_confidence`.
fn best_class_candidates(
    view: ArrayView2<f32>,
    min_confidence: f32,
) -> Vec<(BBox, usize, f32)> {
    view.axis_iter(Axis(1))
        .filter_map(|candidate| {
            let (class_id, confidence) = candidate
                .slice(s![4..])
                .iter()
                .cloned()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (id, score)| {
                    if score > best.1 {
                        (id, score)
                    } else {
                        best
                    }
                });

            if confidence < min_confidence {
                return None;
            }

            let bbox = BBox::from_center(candidate[0], candidate[1], candidate[2], candidate[3]);
            Some((bbox, class_id, confidence))
        })
        .collect()
}

/// Run class-aware non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident bounding box and iterate over all other bounding boxes in the
/// order of sinking confidence. A candidate is kept unless it overlaps an already selected box of
/// the same class by more than `max_iou`. The result is sorted by descending confidence.
fn non_maximum_suppression(
    mut candidates: Vec<(BBox, usize, f32)>,
    max_iou: f32,
) -> Vec<(BBox, usize, f32)> {
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut selected: Vec<(BBox, usize, f32)> = Vec::new();
    'candidates: for (bbox, class_id, confidence) in candidates {
        for (selected_bbox, selected_class, _) in selected.iter() {
            if *selected_class == class_id && bbox.iou(selected_bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push((bbox, class_id, confidence));
    }

    selected
}
