//! Supervision of the aggregated API server under test.

pub mod build;

use crate::process::{HealthCheck, ManagedProcess, ProcessSpec, ProcessState};
use crate::{ExtractorError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use build::build_package;

/// How the aggregated server binary is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// Prebuilt command line; the first element is the program.
    Command(Vec<String>),
    /// Go package built before starting.
    Package {
        package: String,
        build_opts: Vec<String>,
    },
}

impl LaunchSpec {
    /// Resolves the mutually exclusive command / package inputs.
    pub fn from_parts(
        command: Vec<String>,
        package: Option<String>,
        build_opts: Vec<String>,
    ) -> Result<Self> {
        let package = package.filter(|p| !p.is_empty());
        match (command.is_empty(), package) {
            (false, Some(_)) => Err(ExtractorError::ConfigError(
                "--apiserver-command and --apiserver-package are mutually exclusive".to_string(),
            )),
            (false, None) if !build_opts.is_empty() => Err(ExtractorError::ConfigError(
                "--apiserver-build-opts requires --apiserver-package".to_string(),
            )),
            (false, None) => Ok(LaunchSpec::Command(command)),
            (true, Some(package)) => Ok(LaunchSpec::Package {
                package,
                build_opts,
            }),
            (true, None) => Err(ExtractorError::ConfigError(
                "either --apiserver-command or --apiserver-package must be specified".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerOptions {
    pub launch: LaunchSpec,
    pub etcd_servers: Vec<String>,
    pub host: String,
    pub port: u16,
    pub cert_dir: PathBuf,
    pub kubeconfig: PathBuf,
    pub attach_output: bool,
    pub startup_timeout: Duration,
}

impl ApiServerOptions {
    fn args(&self) -> Vec<String> {
        let kubeconfig = self.kubeconfig.display();
        vec![
            format!("--etcd-servers={}", self.etcd_servers.join(",")),
            format!("--bind-address={}", self.host),
            format!("--secure-port={}", self.port),
            format!("--cert-dir={}", self.cert_dir.display()),
            format!("--kubeconfig={}", kubeconfig),
            format!("--authentication-kubeconfig={}", kubeconfig),
            format!("--authorization-kubeconfig={}", kubeconfig),
        ]
    }

    fn health_url(&self) -> String {
        format!("https://{}:{}/readyz", self.host, self.port)
    }
}

/// Lifecycle of the aggregated API server.
#[async_trait]
pub trait AggregatedServer: Send {
    /// Starts the server; returns once it is confirmed listening.
    async fn start(&mut self, options: ApiServerOptions, cancel: &CancellationToken) -> Result<()>;

    /// Stops the server. Succeeds when nothing is running.
    async fn stop(&mut self) -> Result<()>;
}

/// Runs the aggregated server as a local child process.
#[derive(Default)]
pub struct ApiServerSupervisor {
    process: Option<ManagedProcess>,
    build_dir: Option<TempDir>,
}

impl ApiServerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessState {
        self.process
            .as_ref()
            .map(ManagedProcess::state)
            .unwrap_or(ProcessState::NotStarted)
    }

    async fn resolve_command(
        &mut self,
        options: &ApiServerOptions,
    ) -> Result<(PathBuf, Vec<String>)> {
        match &options.launch {
            LaunchSpec::Command(command) => {
                let (program, args) = command.split_first().ok_or_else(|| {
                    ExtractorError::ConfigError("--apiserver-command is empty".to_string())
                })?;
                Ok((PathBuf::from(program), args.to_vec()))
            }
            LaunchSpec::Package {
                package,
                build_opts,
            } => {
                let build_dir = tempfile::Builder::new()
                    .prefix("openapi-extractor-build-")
                    .tempdir()?;
                let binary =
                    build_package(package, build_opts, build_dir.path(), options.attach_output)
                        .await?;
                self.build_dir = Some(build_dir);
                Ok((binary, Vec::new()))
            }
        }
    }
}

#[async_trait]
impl AggregatedServer for ApiServerSupervisor {
    async fn start(&mut self, options: ApiServerOptions, cancel: &CancellationToken) -> Result<()> {
        if self.process.is_some() {
            return Err(ExtractorError::StartupFailed {
                component: "api server".to_string(),
                message: "already started".to_string(),
            });
        }

        let (program, mut args) = self.resolve_command(&options).await?;
        args.extend(options.args());

        let process = self.process.insert(ManagedProcess::new(ProcessSpec {
            name: "api server".to_string(),
            program,
            args,
            health: Some(HealthCheck::insecure_https(options.health_url())),
            startup_timeout: options.startup_timeout,
            attach_output: options.attach_output,
        }));
        process.start(cancel).await?;

        info!("Api server is serving on {}:{}", options.host, options.port);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let result = match self.process.as_mut() {
            Some(process) => process.stop().await,
            None => Ok(()),
        };

        let cleanup = match self.build_dir.take() {
            Some(build_dir) => {
                let path = build_dir.path().to_path_buf();
                build_dir.close().map_err(|e| ExtractorError::StopFailed {
                    component: "api server".to_string(),
                    message: format!("removing build directory {}: {}", path.display(), e),
                })
            }
            None => Ok(()),
        };

        result.and(cleanup)
    }
}
