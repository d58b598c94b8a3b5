use crate::apiserver::ApiServerSupervisor;
use crate::cli::Cli;
use crate::config::ExtractorConfig;
use crate::controlplane::local::{LocalControlPlane, LocalControlPlaneOptions};
use crate::orchestrator::{self, RunContext, RunOutcome};
use crate::registrar::KubeServiceRegistrar;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Validates the command line and performs one extraction run.
pub async fn execute(cli: Cli) -> Result<RunOutcome> {
    let config = ExtractorConfig::from_cli(&cli).context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut ctx = build_context(&config);
    let outcome = orchestrator::run(&mut ctx, &cancel).await;

    if outcome.is_success() {
        info!("OpenAPI extraction finished, wrote {} files", outcome.written.len());
    }

    Ok(outcome)
}

fn build_context(config: &ExtractorConfig) -> RunContext {
    let control_plane = LocalControlPlane::new(LocalControlPlaneOptions {
        assets_dir: config.control_plane_assets.clone(),
        attach_output: config.attach_control_plane_output,
        startup_timeout: config.startup_timeout,
    });

    RunContext {
        control_plane: Box::new(control_plane),
        registrar: Box::new(KubeServiceRegistrar::new(config.api_service_paths.clone())),
        api_server: Box::new(ApiServerSupervisor::new()),
        settings: config.run_settings(),
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, cancelling");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            let interrupted = tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = terminate.recv() => Ok(()),
            };
            if let Err(e) = interrupted {
                warn!("Failed to listen for SIGINT: {}", e);
                terminate.recv().await;
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
