//! Palm server binary.
//!
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use palm_server::{
    annotate::{load_font, Annotator},
    config::Args,
    endpoints::{router, AppState},
    inferer::Inferer,
    labels::Labels,
    meter::spawn_meter_logger,
    nn::YoloModel,
    store::ResultStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    args.validate()?;

    // Load network and class names
    let labels = args.labels.as_ref().map(Labels::from_file).transpose()?;
    let model_path = args.resolve_model_path().await?;
    let model = YoloModel::load(&model_path, args.yolo_params(), labels)?;

    let font = load_font(args.font.as_deref())?;
    if font.is_none() {
        log::warn!("No font found, boxes will be drawn without labels (see --font)");
    }
    let annotator = Annotator::new(font, args.line_width);

    // Run inference on its own thread, fed by the HTTP handlers
    let inferer = Inferer::spawn(Arc::new(model), annotator, args.queue_len)?;
    let state = Arc::new(AppState {
        inferer,
        store: ResultStore::new(args.cache_size),
    });

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = router(state, args.max_upload_bytes);

    // Serve HTTP server
    let addr = args.socket_addr()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
