use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use palm_sender::{output_file_name, PalmClient, SendMode};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Send oil-palm images to the palm server")]
struct Args {
    /// Address of the palm server
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Send images as data URLs like the browser camera does
    #[clap(long)]
    camera: bool,

    /// Directory to store annotated images in
    #[clap(long, default_value = ".")]
    out_dir: PathBuf,

    /// JPEG or PNG images to analyze
    #[clap(required = true)]
    images: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let mode = match args.camera {
        true => SendMode::Camera,
        false => SendMode::Upload,
    };
    log::info!("Sending {} images to {} ({:?})", args.images.len(), &args.address, mode);

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let client = PalmClient::new(&args.address);
    let mut failed = 0;
    for image in args.images.iter() {
        if let Err(e) = process(&client, image, mode, &args.out_dir).await {
            log::error!("{}: {:#}", image.display(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} images failed", failed, args.images.len());
    }

    Ok(())
}

async fn process(client: &PalmClient, image: &Path, mode: SendMode, out_dir: &Path) -> Result<()> {
    let report = client.detect_file(image, mode).await?;

    log::info!(
        "{}: {} objects detected",
        image.display(),
        report.counts.total()
    );
    for count in report.counts.iter() {
        log::info!("  - {}: {}", count.name, count.count);
    }

    let annotated = client.download(&report).await?;
    let target = out_dir.join(output_file_name(image));
    tokio::fs::write(&target, &annotated)
        .await
        .with_context(|| format!("failed to write {}", target.display()))?;
    log::info!("Saved {}", target.display());

    Ok(())
}
