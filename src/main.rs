//! devlink - Telemetry and media link daemon
//!
//! Configures a remote inference device, streams frames to it and pairs the
//! pose results it sends back with the frames they came from.

use devlink_pipeline::{CancelToken, Config, Session};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if DEVLINK_CONFIG is set, then env overrides)
    let config_path = std::env::var("DEVLINK_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting devlink");
    tracing::info!("  Device: {}", config.network.target_control());
    tracing::info!(
        "  Local: control {} / stream {}",
        config.network.control_bind(),
        config.network.stream_bind()
    );
    match &config.source.path {
        Some(path) => tracing::info!("  Source: {}", path.display()),
        None => tracing::info!("  Source: device camera"),
    }

    let configure = config.device.configure;
    let session = Session::open(config)?;
    if configure {
        if let Err(e) = session.configure_device() {
            tracing::error!("Device setup failed: {}", e);
            return Err(e.into());
        }
    } else {
        tracing::info!("Skipping device setup");
    }

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        handler_token.cancel();
    })?;

    let running = session.start_with_token(token)?;
    let shown = running.run_logging();
    tracing::info!(shown, "Display loop finished");

    running.shutdown()?;
    tracing::info!("devlink stopped");
    Ok(())
}
