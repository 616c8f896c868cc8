//! detect_image - run zone-aware waste detection on one image file.
//!
//! Prints the same JSON document `POST /detect` returns. The annotated JPEG can
//! be written next to it with `--out`.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use clap::Parser;
use std::path::PathBuf;

use waste_zone_detector::{detect_waste, AppContext, WasteApiConfig};

#[derive(Parser, Debug)]
#[command(
    name = "detect_image",
    about = "Classify the waste in an image against the disposal zones"
)]
struct Args {
    /// Image to analyse (JPEG or PNG)
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Detection zone as JSON, e.g. "[100,100,300,300]"
    #[arg(long, value_name = "JSON")]
    zone: Option<String>,

    /// Write the annotated JPEG here
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Config file (JSON or TOML); defaults to $WASTE_CONFIG
    #[arg(long, value_name = "PATH", env = "WASTE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the confidence threshold
    #[arg(long, value_name = "0..1")]
    threshold: Option<f32>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = WasteApiConfig::load_from(args.config.as_deref())?;
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--threshold must be within [0, 1]"));
        }
        config.confidence_threshold = threshold;
    }
    let ctx = AppContext::from_config(&config);

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let response = detect_waste(&ctx, &bytes, args.zone.as_deref())
        .map_err(|err| anyhow!("detection failed ({}): {}", err.status(), err))?;

    if let Some(out) = &args.out {
        let encoded = response
            .result_image
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or_default();
        let jpeg = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        std::fs::write(out, jpeg).with_context(|| format!("failed to write {}", out.display()))?;
        log::info!("annotated image written to {}", out.display());
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{json}");
    Ok(())
}
