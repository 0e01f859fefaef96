//! Inference worker.
//!
//! The network is CPU bound, so it runs on its own thread instead of a runtime worker. HTTP
//! handlers submit images through a bounded channel and await the annotated result.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use common::{counts::ClassCounts, detection::Detection};
use image::{DynamicImage, RgbImage};
use tokio::sync::{mpsc, oneshot};

use crate::{
    annotate::{encode_png, Annotator},
    meter::METER,
    nn::InferModel,
};

/// Everything produced for one image.
#[derive(Debug, Clone)]
pub struct InferOutcome {
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub counts: ClassCounts,
    /// Annotated image as PNG.
    pub png: Bytes,
}

struct Job {
    image: RgbImage,
    reply_tx: oneshot::Sender<Result<InferOutcome>>,
}

pub struct Inferer {
    infer_rx: mpsc::Receiver<Job>,
    model: Arc<dyn InferModel>,
    annotator: Annotator,
}

/// Cheaply cloneable handle to submit images to the inference thread.
#[derive(Clone)]
pub struct InfererHandle {
    infer_tx: mpsc::Sender<Job>,
}

impl Inferer {
    /// Spawn the inference thread. It stops once all handles are dropped.
    pub fn spawn(
        model: Arc<dyn InferModel>,
        annotator: Annotator,
        queue_len: usize,
    ) -> Result<InfererHandle> {
        let (infer_tx, infer_rx) = mpsc::channel(queue_len.max(1));
        let inferer = Inferer {
            infer_rx,
            model,
            annotator,
        };

        thread::Builder::new()
            .name("inferer".into())
            .spawn(move || inferer.run())
            .context("failed to spawn inference thread")?;

        Ok(InfererHandle { infer_tx })
    }

    fn run(mut self) {
        log::debug!("Inference thread started");
        while let Some(job) = self.infer_rx.blocking_recv() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.process(job.image)))
                .unwrap_or_else(|_| {
                    log::error!("Inference panicked, dropping the image");
                    Err(anyhow!("inference panicked"))
                });
            if job.reply_tx.send(outcome).is_err() {
                log::debug!("Requester went away before inference finished");
            }
        }
        log::debug!("Inference thread stopped");
    }

    fn process(&self, image: RgbImage) -> Result<InferOutcome> {
        let (width, height) = image.dimensions();
        let detections = self.model.detect(&image)?;
        let counts = ClassCounts::tally(&detections);
        log::debug!("Found {} objects in {}x{} image", detections.len(), width, height);

        let frame = self.annotator.annotate(&image, &detections);
        let png = encode_png(&frame)?;

        METER.tick_image(detections.len());

        Ok(InferOutcome {
            width,
            height,
            detections,
            counts,
            png,
        })
    }
}

impl InfererHandle {
    /// Run detection and annotation on an image.
    pub async fn infer(&self, image: DynamicImage) -> Result<InferOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            image: image.to_rgb8(),
            reply_tx,
        };

        self.infer_tx
            .send(job)
            .await
            .map_err(|_| anyhow!("inference thread stopped"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("inference thread dropped the request"))?
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::detection::BBox;
    use image::Rgb;

    struct FixedModel;

    impl InferModel for FixedModel {
        fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(vec![
                Detection {
                    bbox: BBox::new(0.0, 0.0, w / 2.0, h / 2.0),
                    class_id: 3,
                    label: "ripe".into(),
                    confidence: 0.9,
                },
                Detection {
                    bbox: BBox::new(w / 2.0, h / 2.0, w, h),
                    class_id: 5,
                    label: "unripe".into(),
                    confidence: 0.6,
                },
            ])
        }
    }

    struct FailingModel;

    impl InferModel for FailingModel {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Err(anyhow!("model exploded"))
        }
    }

    struct PanickingModel;

    impl InferModel for PanickingModel {
        fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
            if image.width() == 13 {
                panic!("bad image");
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_infer_counts_and_annotates() -> Result<()> {
        let handle = Inferer::spawn(Arc::new(FixedModel), Annotator::new(None, 1), 2)?;
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([10, 10, 10])));

        let outcome = handle.infer(image).await?;

        assert_eq!((outcome.width, outcome.height), (64, 48));
        assert_eq!(outcome.detections.len(), 2);
        assert_eq!(outcome.counts.get("ripe"), Some(1));
        assert_eq!(outcome.counts.get("unripe"), Some(1));

        let annotated = image::load_from_memory(&outcome.png)?.to_rgb8();
        assert_eq!(annotated.dimensions(), (64, 48));
        assert_eq!(annotated[(0, 0)], crate::labels::class_color(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_model_errors_are_returned() -> Result<()> {
        let handle = Inferer::spawn(Arc::new(FailingModel), Annotator::new(None, 1), 1)?;
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));

        let err = handle.infer(image).await.unwrap_err();
        assert!(err.to_string().contains("model exploded"));

        // The worker survives a failed job
        let err = handle.infer(DynamicImage::ImageRgb8(RgbImage::new(8, 8))).await;
        assert!(err.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_model() -> Result<()> {
        let handle = Inferer::spawn(Arc::new(PanickingModel), Annotator::new(None, 1), 1)?;

        let err = handle
            .infer(DynamicImage::ImageRgb8(RgbImage::new(13, 8)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));

        let outcome = handle.infer(DynamicImage::ImageRgb8(RgbImage::new(8, 8))).await?;
        assert!(outcome.detections.is_empty());
        Ok(())
    }
}
