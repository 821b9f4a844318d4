//! `run` command handler
//!
//! Loads configuration, builds the devices and controller, serves the HTTP
//! API and shuts everything down on the first termination signal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::cli::args::RunArgs;
use crate::config::{ConfigStore, YamlFileStore};
use crate::controller::{Controller, ControllerOptions};
use crate::error::{ConfigError, ScareBoxError};
use crate::hardware::Devices;

/// Run the installation until `shutdown` fires.
///
/// # Errors
///
/// Returns a config error for an unreadable or invalid configuration, a
/// hardware error if a device fails to initialize, or a server error if the
/// HTTP listener cannot bind.
pub async fn run(args: &RunArgs, shutdown: CancellationToken) -> Result<(), ScareBoxError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    tracing::info!(config = %args.config.display(), "loading configuration");
    let store = YamlFileStore::new(&args.config);
    let settings = store.load()?;

    let validation = settings.validate();
    for warning in &validation.warnings {
        tracing::warn!(path = %warning.path, "{}", warning.message);
    }
    if validation.has_errors() {
        return Err(ConfigError::ValidationError {
            path: store.location(),
            errors: validation.errors,
        }
        .into());
    }

    let bind_addr = match &args.bind {
        Some(bind) => api::parse_bind_addr(bind)?,
        None => settings.server.bind_addr(),
    };
    let cors_origins = settings.server.cors_origins.clone();
    let subscriber_queue = settings.telemetry.subscriber_queue;

    let devices = Devices::simulated(&settings);
    let controller = Arc::new(Controller::spawn(ControllerOptions::new(
        settings,
        devices,
        Arc::new(store),
    )));

    controller.initialize().await?;
    if !args.no_autostart {
        controller.start().await?;
    }

    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
        subscriber_queue,
    });
    let app = api::router(state, &cors_origins);
    let server_cancel = shutdown.child_token();
    let (bound, mut server) = api::serve(&bind_addr, app, server_cancel.clone()).await?;
    tracing::info!(api = %format!("http://{bound}/api"), ws = %format!("ws://{bound}/ws"), "Scare Box ready");

    tokio::select! {
        () = shutdown.cancelled() => {
            tracing::info!("shutdown requested");
        }
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server task failed");
            }
            tracing::warn!("HTTP server exited, shutting down");
        }
    }
    server_cancel.cancel();

    match tokio::time::timeout(args.shutdown_timeout, controller.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "controller shutdown failed"),
        Err(_) => tracing::warn!(
            timeout = %humantime::format_duration(args.shutdown_timeout),
            "controller did not stop in time"
        ),
    }
    if !server.is_finished()
        && tokio::time::timeout(args.shutdown_timeout, &mut server)
            .await
            .is_err()
    {
        tracing::warn!("HTTP server did not drain in time");
        server.abort();
    }

    tracing::info!("Goodbye");
    Ok(())
}
