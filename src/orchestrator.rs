//! End-to-end sequencing of one extraction run.
//!
//! Phases run strictly one after another. The first failure becomes the
//! run's primary error and skips the remaining phases. Every resource whose
//! start was attempted is stopped exactly once, in reverse start order,
//! whatever happened before.

use crate::apiserver::{AggregatedServer, ApiServerOptions, LaunchSpec};
use crate::controlplane::ControlPlane;
use crate::extract::{ExtractionSummary, SpecExtractor};
use crate::readiness::{ReadinessPoller, DEFAULT_POLL_INTERVAL};
use crate::registrar::ServiceRegistrar;
use crate::{ExtractorError, Phase, PhaseError};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub output_dir: PathBuf,
    pub launch: LaunchSpec,
    pub openapi_timeout: Duration,
    pub api_service_timeout: Duration,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub attach_apiserver_output: bool,
}

impl RunSettings {
    pub fn new(output_dir: impl Into<PathBuf>, launch: LaunchSpec) -> Self {
        Self {
            output_dir: output_dir.into(),
            launch,
            openapi_timeout: Duration::from_secs(30),
            api_service_timeout: Duration::from_secs(5 * 60),
            startup_timeout: Duration::from_secs(60),
            poll_interval: DEFAULT_POLL_INTERVAL,
            attach_apiserver_output: false,
        }
    }
}

/// Everything one run owns. Dropped when the run ends.
pub struct RunContext {
    pub control_plane: Box<dyn ControlPlane>,
    pub registrar: Box<dyn ServiceRegistrar>,
    pub api_server: Box<dyn AggregatedServer>,
    pub settings: RunSettings,
}

/// Terminal value of a run.
///
/// The primary error is left for the caller to report; teardown errors are
/// logged as they happen.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub primary_error: Option<PhaseError>,
    pub teardown_errors: Vec<PhaseError>,
    /// Files written, in write order.
    pub written: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.primary_error.is_none()
    }

    /// Teardown errors never change the exit code.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    ControlPlane,
    ApiServer,
}

pub async fn run(ctx: &mut RunContext, cancel: &CancellationToken) -> RunOutcome {
    let mut outcome = RunOutcome::default();
    let mut started = Vec::new();

    if let Err(e) = run_phases(ctx, cancel, &mut started, &mut outcome).await {
        outcome.primary_error = Some(e);
    }

    teardown(ctx, started, &mut outcome).await;

    outcome
}

fn at(phase: Phase) -> impl FnOnce(ExtractorError) -> PhaseError {
    move |source| PhaseError::new(phase, source)
}

fn check_cancelled(cancel: &CancellationToken, phase: Phase) -> Result<(), PhaseError> {
    if cancel.is_cancelled() {
        return Err(PhaseError::new(phase, ExtractorError::Cancelled));
    }
    Ok(())
}

async fn run_phases(
    ctx: &mut RunContext,
    cancel: &CancellationToken,
    started: &mut Vec<Resource>,
    outcome: &mut RunOutcome,
) -> Result<(), PhaseError> {
    let settings = ctx.settings.clone();

    check_cancelled(cancel, Phase::ControlPlane)?;
    info!("Starting control plane");
    started.push(Resource::ControlPlane);
    let endpoint = ctx
        .control_plane
        .start(cancel)
        .await
        .map_err(at(Phase::ControlPlane))?;

    check_cancelled(cancel, Phase::Registration)?;
    info!("Installing api services");
    let registration = ctx
        .registrar
        .install(&endpoint)
        .await
        .map_err(at(Phase::Registration))?;
    let group_versions = registration.group_versions();

    check_cancelled(cancel, Phase::ApiServer)?;
    let options = ApiServerOptions {
        launch: settings.launch.clone(),
        etcd_servers: endpoint.etcd_servers.clone(),
        host: registration.serving.host.clone(),
        port: registration.serving.port,
        cert_dir: registration.serving.cert_dir.clone(),
        kubeconfig: endpoint.kubeconfig.clone(),
        attach_output: settings.attach_apiserver_output,
        startup_timeout: settings.startup_timeout,
    };
    started.push(Resource::ApiServer);
    ctx.api_server
        .start(options, cancel)
        .await
        .map_err(at(Phase::ApiServer))?;

    check_cancelled(cancel, Phase::ApiServiceAvailability)?;
    ctx.registrar
        .wait_until_available(settings.api_service_timeout, cancel)
        .await
        .map_err(at(Phase::ApiServiceAvailability))?;

    let discovery = ctx
        .control_plane
        .discovery()
        .await
        .map_err(at(Phase::Readiness))?;
    ReadinessPoller::new(discovery.clone(), settings.openapi_timeout)
        .with_interval(settings.poll_interval)
        .wait(&group_versions, cancel)
        .await
        .map_err(at(Phase::Readiness))?;

    check_cancelled(cancel, Phase::Extraction)?;
    let extractor = SpecExtractor::new(discovery, &settings.output_dir);
    let mut summary = ExtractionSummary::default();
    let result = extractor.extract_all(&group_versions, &mut summary).await;
    outcome.written = summary.written;
    result.map_err(|e| PhaseError::new(extraction_phase(&e), e))?;

    info!(
        "Extracted {} OpenAPI documents into {}",
        outcome.written.len(),
        settings.output_dir.display()
    );
    Ok(())
}

fn extraction_phase(err: &ExtractorError) -> Phase {
    match err {
        ExtractorError::WriteFailed { .. } | ExtractorError::IoError(_) => Phase::Persistence,
        _ => Phase::Extraction,
    }
}

async fn teardown(ctx: &mut RunContext, started: Vec<Resource>, outcome: &mut RunOutcome) {
    for resource in started.into_iter().rev() {
        let result = match resource {
            Resource::ApiServer => ctx.api_server.stop().await,
            Resource::ControlPlane => ctx.control_plane.stop().await,
        };

        if let Err(e) = result {
            let e = PhaseError::new(Phase::Teardown, e);
            error!("{}", e);
            outcome.teardown_errors.push(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_errors_do_not_fail_the_run() {
        let outcome = RunOutcome {
            primary_error: None,
            teardown_errors: vec![PhaseError::new(
                Phase::Teardown,
                ExtractorError::StopFailed {
                    component: "api server".to_string(),
                    message: "boom".to_string(),
                },
            )],
            written: vec![],
        };

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_primary_error_fails_the_run() {
        let outcome = RunOutcome {
            primary_error: Some(PhaseError::new(Phase::Readiness, ExtractorError::Cancelled)),
            ..Default::default()
        };

        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            outcome.primary_error.unwrap().to_string(),
            "openapi readiness failed: Operation cancelled"
        );
    }

    #[test]
    fn test_write_failures_are_persistence_errors() {
        let err = ExtractorError::WriteFailed {
            path: PathBuf::from("/out/swagger.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(extraction_phase(&err), Phase::Persistence);

        let err = ExtractorError::FetchFailed {
            path: "/openapi/v2".to_string(),
            message: "500".to_string(),
        };
        assert_eq!(extraction_phase(&err), Phase::Extraction);
    }
}
