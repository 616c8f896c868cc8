//! waste_api - HTTP service for zone-aware waste detection
//!
//! This daemon:
//! 1. Loads the detector once (falling back through configured model paths)
//! 2. Opens the optional detection log
//! 3. Serves `/`, `/detect` and `/analytics` until Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};

use waste_zone_detector::{
    api::{ApiConfig, ApiServer},
    AppContext, WasteApiConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WasteApiConfig::load()?;
    let ctx = Arc::new(AppContext::from_config(&config));
    if !ctx.model_ready() {
        log::error!("no detector loaded; /detect will answer 500 until the service is restarted");
    }

    let api_handle = ApiServer::new(ApiConfig::from(&config), ctx).spawn()?;
    log::info!(
        "waste_api {} running on {} (confidence threshold {})",
        env!("CARGO_PKG_VERSION"),
        api_handle.addr,
        config.confidence_threshold
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("waste_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
