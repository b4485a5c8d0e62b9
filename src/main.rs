//! Espresso Supervisor - Main Entry Point
//!
//! Runs the supervision engine against the backend selected by the
//! environment and logs the events it publishes.

use anyhow::Context;
use espresso_supervisor::{
    collaborators::Collaborators,
    config::{FileConfigStore, RuntimeSettings},
    transport::open_transport,
    FirmwareVersion, Machine,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    let settings = RuntimeSettings::from_env();

    // Initialize logging
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("backend.log")
        .build(&settings.log_dir);
    let (file_layer, _log_guard, file_error) = match file_appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,espresso_supervisor=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("Logging to stdout only, cannot write to {:?}: {}", settings.log_dir, e);
    }

    tracing::info!("Starting espresso supervisor on the {} backend", settings.backend);

    let config = match &settings.config_path {
        Some(path) => FileConfigStore::open(path.clone()),
        None => FileConfigStore::open_default().context("no data directory for the config")?,
    };
    tracing::info!("Using config at {:?}", config.path());

    let firmware_available = match FirmwareVersion::read_from_file(&settings.firmware.version_file) {
        Ok(version) => version,
        Err(e) => {
            tracing::warn!("Could not read the bundled firmware version: {}", e);
            None
        }
    };

    let (machine, events) = Machine::new(Arc::new(config), Collaborators::default(), firmware_available);
    let transport = open_transport(&settings)
        .with_context(|| format!("failed to open {:?}", settings.device_path))?;
    let workers = machine.start(transport, &settings)?;

    let mut last_stats = Instant::now();
    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(Some(event)) => tracing::debug!("{}: {}", event.name(), event.payload()),
            Ok(None) => {}
            Err(_) => break,
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            if let Some(stats) = machine.transport_stats() {
                tracing::debug!(
                    "Link: {} frames, {} bytes in, {} bytes out, {} writes dropped, {} events dropped",
                    stats.frames_received,
                    stats.bytes_received,
                    stats.bytes_written,
                    stats.writes_dropped,
                    events.dropped_events()
                );
            }
            last_stats = Instant::now();
        }
    }

    tracing::info!("Shutting down...");
    machine.shutdown();
    workers.join();
    Ok(())
}
