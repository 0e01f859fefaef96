//! Throughput counters, logged periodically.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

const LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct Meter {
    images: AtomicU64,
    detections: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            images: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    /// Count one processed image with its number of detections.
    pub fn tick_image(&self, detections: usize) {
        self.images.fetch_add(1, Ordering::Relaxed);
        self.detections
            .fetch_add(detections as u64, Ordering::Relaxed);
    }

    /// Take the counts since the last call as `(images, detections)`.
    pub fn get_reset(&self) -> (u64, u64) {
        (
            self.images.swap(0, Ordering::Relaxed),
            self.detections.swap(0, Ordering::Relaxed),
        )
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(LOG_INTERVAL);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let (images, detections) = METER.get_reset();
            let elapsed = start.elapsed().as_secs_f32();

            if images > 0 {
                log::info!(
                    "Processed {} images ({:.2}/s) with {} detections",
                    images,
                    images as f32 / elapsed,
                    detections
                );
            }
        }
    })
}
