//! Utility functions
//!
use std::path::Path;

use anyhow::{bail, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        bail!("download of {} failed with status {}", url, resp.status());
    }

    tokio::fs::write(filepath, resp.bytes().await?).await?;

    Ok(())
}
