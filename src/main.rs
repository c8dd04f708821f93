//! SnapText - on-device screen text capture
//!
//! Runs one capture through the full coordinator: authorization, mirroring,
//! OCR and presentation on the console.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use snaptext::capture::{
    AuthorizationPrompt, CaptureConfig, FrameAcquisition, GrantData, GrantNotification, GrantNotifier,
    ProjectionBackend, RequestId, StillImageBackend,
};
use snaptext::config::{self, AppConfig};
use snaptext::storage;
use snaptext::vision::{AssetStore, DecodedText, OcrPipeline};
use snaptext::{CaptureCoordinator, CaptureError, ResultPresenter};

/// SnapText - read the text on your screen
#[derive(Parser, Debug)]
#[command(name = "snaptext")]
#[command(about = "Capture the screen once and recognize its text on-device")]
struct Args {
    /// Replay this image file as the mirrored screen
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Extra bytes appended to every row of the replayed frame
    #[arg(long, default_value = "0")]
    row_padding: usize,

    /// Mirror the primary monitor (needs the desktop-capture feature)
    #[arg(long)]
    screen: bool,

    /// Directory holding the bundled models and dictionary
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Settings file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run text detection and recognize each region
    #[arg(long)]
    detect: bool,

    /// Write the effective settings to the config file and exit
    #[arg(long)]
    write_config: bool,
}

/// The person running the command has already consented
struct CommandLinePrompt;

impl AuthorizationPrompt for CommandLinePrompt {
    fn show(&self, request_id: RequestId, reply: GrantNotifier) -> Result<()> {
        debug!("Auto-approving capture request {}", request_id);
        reply.deliver(GrantNotification {
            request_id,
            granted: true,
            grant_data: GrantData::new(b"command-line".to_vec()),
        });
        Ok(())
    }
}

struct ConsolePresenter;

impl ResultPresenter for ConsolePresenter {
    fn present_text(&self, text: &DecodedText) {
        if text.is_empty() {
            println!("No text recognized");
        } else {
            println!("{}", text);
        }
    }

    fn present_failure(&self, error: &CaptureError) {
        eprintln!("{}", error.user_message());
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };
    let mut config = config::load_or_default(&config_path)?;
    if let Some(assets) = &args.assets {
        config.assets.bundle_dir = assets.clone();
    }
    if args.detect {
        config.pipeline.use_detection = true;
    }

    if args.write_config {
        config::save_config(&config, &config_path)
            .with_context(|| format!("Failed to write config {:?}", config_path))?;
        info!("Configuration written to {:?}", config_path);
        return Ok(ExitCode::SUCCESS);
    }

    let backend = open_backend(&args)?;
    let coordinator = build_coordinator(&config, backend)?;
    coordinator.toggle_capability(true);

    let outcome = coordinator.start_capture().await;
    coordinator.toggle_capability(false);

    Ok(match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

fn open_backend(args: &Args) -> Result<Box<dyn ProjectionBackend>> {
    if let Some(path) = &args.image {
        let backend = StillImageBackend::open(path)?.with_row_padding(args.row_padding);
        return Ok(Box::new(backend));
    }

    if args.screen {
        return desktop_backend();
    }

    anyhow::bail!("Nothing to capture: pass --image <path> or --screen")
}

#[cfg(feature = "desktop-capture")]
fn desktop_backend() -> Result<Box<dyn ProjectionBackend>> {
    Ok(Box::new(snaptext::capture::desktop::DesktopBackend::primary()?))
}

#[cfg(not(feature = "desktop-capture"))]
fn desktop_backend() -> Result<Box<dyn ProjectionBackend>> {
    anyhow::bail!("Monitor capture is not available: rebuild with --features desktop-capture")
}

fn build_coordinator(config: &AppConfig, backend: Box<dyn ProjectionBackend>) -> Result<CaptureCoordinator> {
    let cache_dir = match &config.assets.cache_dir {
        Some(dir) => dir.clone(),
        None => storage::get_cache_dir()?,
    };
    let store = AssetStore::new(config.assets.bundle_dir.clone(), cache_dir, config.assets.clone())?;

    let pipeline = OcrPipeline::load(&store, &config.pipeline, &config.enhancement);
    for (kind, cached, size) in store.asset_status() {
        debug!("{}: cached={} size={:?}", kind.display_name(), cached, size);
    }
    if !pipeline.is_ready() {
        info!("Some OCR assets failed to load; captures will report it");
    }

    let acquisition = FrameAcquisition::new(backend, CaptureConfig::from(&config.capture));

    Ok(CaptureCoordinator::new(
        Arc::new(CommandLinePrompt),
        acquisition,
        pipeline,
        Arc::new(ConsolePresenter),
    ))
}
