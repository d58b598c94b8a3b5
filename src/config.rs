//! Validated run configuration.

use crate::apiserver::LaunchSpec;
use crate::cli::Cli;
use crate::orchestrator::RunSettings;
use crate::readiness::DEFAULT_POLL_INTERVAL;
use crate::{ExtractorError, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub launch: LaunchSpec,
    pub api_service_paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub openapi_timeout: Duration,
    pub api_service_timeout: Duration,
    pub startup_timeout: Duration,
    pub control_plane_assets: PathBuf,
    pub attach_control_plane_output: bool,
    pub attach_apiserver_output: bool,
}

impl ExtractorConfig {
    /// Validates flag combinations before anything is started.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let launch = LaunchSpec::from_parts(
            cli.apiserver_command.clone(),
            cli.apiserver_package.clone(),
            cli.apiserver_build_opts.clone(),
        )?;

        if cli.apiservices.is_empty() {
            return Err(ExtractorError::ConfigError(
                "--apiservices must name at least one path".to_string(),
            ));
        }
        if cli.openapi_timeout.is_zero() {
            return Err(ExtractorError::ConfigError(
                "--openapi-timeout must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            launch,
            api_service_paths: cli.apiservices.clone(),
            output_dir: cli.output.clone(),
            openapi_timeout: cli.openapi_timeout,
            api_service_timeout: cli.apiservice_timeout,
            startup_timeout: cli.startup_timeout,
            control_plane_assets: cli.control_plane_assets.clone(),
            attach_control_plane_output: cli.attach_control_plane_output,
            attach_apiserver_output: cli.attach_apiserver_output,
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            output_dir: self.output_dir.clone(),
            launch: self.launch.clone(),
            openapi_timeout: self.openapi_timeout,
            api_service_timeout: self.api_service_timeout,
            startup_timeout: self.startup_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            attach_apiserver_output: self.attach_apiserver_output,
        }
    }
}
