use anyhow::{Context, Result};
use cardioscan_client::{
    AssetResolver, ClientConfig, InputFile, StaticAssetIndex, UploadInput, UploadOrchestrator,
    UploadOutcome,
};
use clap::Parser;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Submit a heart-scan image and its annotation JSON to the inference
/// backend and print the classification results.
#[derive(Parser, Debug)]
#[command(name = "cardioscan-client", version)]
struct Args {
    /// Image file to classify
    #[arg(long)]
    image: PathBuf,

    /// Companion annotation JSON file
    #[arg(long)]
    annotation: PathBuf,

    /// Backend base URL (falls back to CARDIOSCAN_BACKEND_URL, then the default)
    #[arg(long)]
    backend_url: Option<String>,

    /// JSON file mapping class names to lists of related image URLs
    #[arg(long)]
    asset_index: Option<PathBuf>,

    /// Maximum number of retries after a transient failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// Upload request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = ClientConfig::default();
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    } else if let Ok(url) = env::var("CARDIOSCAN_BACKEND_URL") {
        config.backend_url = url;
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_seconds = timeout;
    }
    Url::parse(&config.backend_url)
        .with_context(|| format!("Invalid backend URL: {}", config.backend_url))?;

    let image = InputFile::from_path(&args.image)
        .with_context(|| format!("Failed to read image {}", args.image.display()))?;
    let annotation = InputFile::from_path(&args.annotation)
        .with_context(|| format!("Failed to read annotation {}", args.annotation.display()))?;
    info!(
        "Selected image: {} ({:.2} KB)",
        image.name,
        image.size() as f64 / 1024.0
    );
    info!(
        "Selected annotation: {} ({:.2} KB)",
        annotation.name,
        annotation.size() as f64 / 1024.0
    );

    let assets: Arc<dyn AssetResolver> = match args.asset_index {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read asset index {}", path.display()))?;
            let index: HashMap<String, Vec<String>> = serde_json::from_str(&text)
                .with_context(|| format!("Asset index {} is not valid JSON", path.display()))?;
            Arc::new(StaticAssetIndex::new(index))
        }
        None => Arc::new(StaticAssetIndex::default()),
    };

    let orchestrator = UploadOrchestrator::new(config, assets);
    let health = orchestrator.health();
    let status = health.probe().await;
    info!("Backend health: {}", status);
    health.start();

    let outcome = orchestrator
        .submit(UploadInput {
            image: Some(image),
            annotation: Some(annotation),
        })
        .await;
    health.stop();

    match outcome {
        Some(UploadOutcome::Success(result)) => {
            println!("Predictions:");
            for prediction in &result.predictions {
                println!(
                    "  {}: {:.2}%",
                    prediction.class,
                    prediction.probability * 100.0
                );
            }
            if let Some(highest) = &result.highest {
                println!("Highest prediction: {}", highest.class);
            }
            if let Some(url) = &result.segmented_image_url {
                println!("Segmented image: {}", url);
            }
            if !result.related_images.is_empty() {
                println!("Related images:");
                for image_url in &result.related_images {
                    println!("  {}", image_url);
                }
            }
            Ok(())
        }
        Some(UploadOutcome::Failure(err)) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
        None => {
            eprintln!("Error: an upload is already in progress.");
            std::process::exit(1);
        }
    }
}
