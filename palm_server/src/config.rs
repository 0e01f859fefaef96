//! Command line configuration of the server.
//!
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Client;

use crate::{nn::YoloParams, utils::download_file};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Oil-palm ripeness detection server")]
pub struct Args {
    /// Address to serve HTTP on
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Path to the YOLO model in ONNX format
    #[clap(long, default_value = "palm_ripeness.onnx")]
    pub model: PathBuf,

    /// URL to fetch the model from if the model file does not exist
    #[clap(long)]
    pub model_url: Option<String>,

    /// File with one class name per line, overriding the names stored in the model
    #[clap(long)]
    pub labels: Option<PathBuf>,

    /// TrueType font for box labels; system fonts are tried if unset
    #[clap(long)]
    pub font: Option<PathBuf>,

    /// Side length of the square network input
    #[clap(long, default_value_t = 640)]
    pub input_size: u32,

    /// Minimum class score of a detection
    #[clap(long, default_value_t = 0.25)]
    pub min_confidence: f32,

    /// Maximum overlap of two boxes of the same class before the weaker one is dropped
    #[clap(long, default_value_t = 0.45)]
    pub max_iou: f32,

    /// Maximum number of detections per image
    #[clap(long, default_value_t = 300)]
    pub max_detections: usize,

    /// Thickness of drawn boxes in pixels
    #[clap(long, default_value_t = 3)]
    pub line_width: u32,

    /// Maximum accepted request body size in bytes
    #[clap(long, default_value_t = 16 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Number of annotated results kept for download
    #[clap(long, default_value_t = 32)]
    pub cache_size: usize,

    /// Number of images that may wait for inference
    #[clap(long, default_value_t = 8)]
    pub queue_len: usize,
}

impl Args {
    /// Check value ranges that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("--min-confidence must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.max_iou) {
            bail!("--max-iou must be within [0, 1]");
        }
        if self.input_size == 0 || self.input_size % 32 != 0 {
            bail!("--input-size must be a positive multiple of 32");
        }
        for (name, value) in [
            ("--max-detections", self.max_detections),
            ("--line-width", self.line_width as usize),
            ("--max-upload-bytes", self.max_upload_bytes),
            ("--cache-size", self.cache_size),
            ("--queue-len", self.queue_len),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server_address
            .parse()
            .with_context(|| format!("invalid server address {}", self.server_address))
    }

    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            input_size: self.input_size,
            min_confidence: self.min_confidence,
            max_iou: self.max_iou,
            max_detections: self.max_detections,
        }
    }

    /// Locate the model file, downloading it into the cache dir if needed.
    pub async fn resolve_model_path(&self) -> Result<PathBuf> {
        if self.model.exists() {
            return Ok(self.model.clone());
        }

        let Some(url) = &self.model_url else {
            bail!(
                "model {} not found and no --model-url given",
                self.model.display()
            );
        };

        let file_name = self
            .model
            .file_name()
            .context("--model has no file name")?;
        let cache_dir = dirs::cache_dir()
            .context("no cache directory on this platform")?
            .join("palm_server");
        let cached = cache_dir.join(file_name);
        if cached.exists() {
            log::info!("Using cached model {}", cached.display());
            return Ok(cached);
        }

        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create {}", cache_dir.display()))?;
        fetch_model(url, &cached).await?;

        Ok(cached)
    }
}

async fn fetch_model(url: &str, target: &Path) -> Result<()> {
    log::info!("Downloading model from {} to {}", url, target.display());

    // Download next to the target so a broken transfer never leaves a truncated model behind
    let partial = target.with_extension("part");
    download_file(&Client::new(), url, &partial).await?;
    fs::rename(&partial, target)
        .with_context(|| format!("failed to move model to {}", target.display()))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("palm_server").chain(args.iter().cloned()))
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let args = parse(&[]);
        args.validate()?;

        assert_eq!(args.socket_addr()?.port(), 3000);
        assert_eq!(args.yolo_params(), YoloParams::default());
        assert_eq!(args.max_upload_bytes, 16 * 1024 * 1024);
        Ok(())
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(parse(&["--min-confidence", "1.5"]).validate().is_err());
        assert!(parse(&["--max-iou=-0.1"]).validate().is_err());
        assert!(parse(&["--input-size", "100"]).validate().is_err());
        assert!(parse(&["--cache-size", "0"]).validate().is_err());
        assert!(parse(&["--server-address", "localhost"]).validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_model_without_url() {
        let args = parse(&["--model", "/nonexistent/palm.onnx"]);
        let err = args.resolve_model_path().await.unwrap_err();
        assert!(err.to_string().contains("--model-url"));
    }
}
