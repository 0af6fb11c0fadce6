// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! camera-pipeline — per-camera RTSP streaming + recording pipeline core
//!
//! Usage:
//!   camera-pipeline --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camera_pipeline::controller::PipelineController;
use camera_pipeline::settings::SettingsSnapshot;

#[derive(Parser)]
#[command(name = "camera-pipeline", about = "Per-camera RTSP streaming + recording pipeline core", version)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    gstreamer::init().context("failed to initialize GStreamer")?;

    let cli = Cli::parse();
    let settings = SettingsSnapshot::from_file(&cli.config)
        .with_context(|| format!("failed to load settings from {:?}", cli.config))?;

    info!(cameras = settings.cameras.len(), "starting camera-pipeline");

    let mut controllers = Vec::with_capacity(settings.cameras.len());
    for camera in settings.cameras.iter().filter(|c| c.enabled).cloned() {
        let camera_id = camera.camera_id.clone();
        let controller = PipelineController::new(
            camera,
            settings.recording.clone(),
            settings.streaming.clone(),
            settings.storage.clone(),
        );
        if let Err(e) = controller.start().await {
            error!(camera_id, error = %e, "failed to start camera");
            continue;
        }
        controllers.push(controller);
    }

    if controllers.is_empty() {
        anyhow::bail!("no camera started successfully, exiting");
    }

    wait_for_shutdown(&controllers).await;
    Ok(())
}

async fn wait_for_shutdown(controllers: &[Arc<PipelineController>]) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    for controller in controllers {
        controller.stop().await;
    }
}
