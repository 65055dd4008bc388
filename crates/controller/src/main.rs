use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dossier_cloud::WorkerDispatcher;
use dossier_controller::config::ControllerConfig;
use dossier_controller::state::AppState;
use dossier_controller::tasks;
use dossier_jobs::{sweeper, JobManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ControllerConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dossier_controller=debug,dossier_jobs=debug,dossier_cloud=debug,dossier_store=info".into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!(
        durable_store = config.store.is_durable(),
        dispatcher = config.dispatcher.has_credential(),
        "Loaded controller configuration"
    );

    // --- State store ---
    let store = dossier_store::connect(&config.store)
        .await
        .context("Failed to open state store")?;
    tracing::info!(backend = store.backend_name(), "State store ready");

    // --- Job manager ---
    let manager = Arc::new(JobManager::new(store));

    // --- Worker dispatcher ---
    let dispatcher = Arc::new(WorkerDispatcher::from_config(config.dispatcher.clone()));
    if dispatcher.is_available() {
        tracing::info!(
            app = %config.dispatcher.app_name,
            region = %config.dispatcher.region,
            "Worker dispatcher enabled"
        );
    } else {
        tracing::warn!("FLY_API_TOKEN not set, jobs will not be dispatched to workers");
    }

    let shutdown_timeout = config.shutdown_timeout;
    let sweep_config = config.sweep;
    let state = AppState::new(config, Arc::clone(&manager), dispatcher);

    // --- Sweeper ---
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn(sweeper::run(
        Arc::clone(&manager),
        sweep_config,
        sweep_cancel.clone(),
    ));

    tracing::info!("Controller started");
    shutdown_signal().await;

    // --- Post-shutdown cleanup ---
    tracing::info!("Shutting down controller");

    sweep_cancel.cancel();
    tasks::join_with_timeout("job_sweeper", sweep_handle, Duration::from_secs(5)).await;

    state.orchestrator.shutdown(shutdown_timeout).await;
    tracing::info!("Pending launches settled");

    manager.shutdown(shutdown_timeout).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the controller
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
