//! Supervised child processes with listen confirmation.
//!
//! A [`ManagedProcess`] is started at most once and stopped at most once per
//! run. `start` only succeeds after the configured health endpoint answers,
//! and `stop` is safe to call in any state.

use crate::{ExtractorError, Result};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Stopped,
    Failed,
}

/// Endpoint polled to confirm a process is serving.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub url: String,
    pub insecure: bool,
}

impl HealthCheck {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            insecure: false,
        }
    }

    /// HTTPS endpoint serving a self-signed certificate.
    pub fn insecure_https(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            insecure: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub health: Option<HealthCheck>,
    pub startup_timeout: Duration,
    pub attach_output: bool,
}

pub struct ManagedProcess {
    spec: ProcessSpec,
    child: Option<Child>,
    state: ProcessState,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            child: None,
            state: ProcessState::NotStarted,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Spawns the process and waits until it is confirmed serving.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != ProcessState::NotStarted {
            return Err(self.startup_error(format!("process is already {:?}", self.state)));
        }

        info!("Starting {}: {}", self.spec.name, self.spec.program.display());
        debug!("{} arguments: {:?}", self.spec.name, self.spec.args);

        let (stdout, stderr) = if self.spec.attach_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                self.state = ProcessState::Failed;
                return Err(self.startup_error(format!("spawn failed: {}", e)));
            }
        };
        self.child = Some(child);

        match self.await_ready(cancel).await {
            Ok(()) => {
                self.state = ProcessState::Running;
                info!("{} is running (pid {:?})", self.spec.name, self.pid());
                Ok(())
            }
            Err(e) => {
                if let Some(mut child) = self.child.take() {
                    if let Err(kill_err) = child.kill().await {
                        debug!("Failed to kill {}: {}", self.spec.name, kill_err);
                    }
                }
                self.state = ProcessState::Failed;
                Err(e)
            }
        }
    }

    async fn await_ready(&mut self, cancel: &CancellationToken) -> Result<()> {
        let health = match &self.spec.health {
            Some(health) => health.clone(),
            None => return Ok(()),
        };

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(health.insecure)
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| self.startup_error(format!("health client: {}", e)))?;

        let deadline = tokio::time::sleep(self.spec.startup_timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(
                        self.startup_error(format!("exited before becoming ready ({})", status))
                    );
                }
            }

            match client.get(&health.url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!("{} not ready yet: {}", self.spec.name, resp.status()),
                Err(e) => debug!("{} not ready yet: {}", self.spec.name, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExtractorError::Cancelled),
                _ = &mut deadline => {
                    return Err(self.startup_error(format!(
                        "not ready within {:?} ({})",
                        self.spec.startup_timeout, health.url
                    )));
                }
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
            }
        }
    }

    /// Terminates the process. A no-op unless the process is running.
    pub async fn stop(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => {
                debug!("{} has nothing to stop ({:?})", self.spec.name, self.state);
                return Ok(());
            }
        };

        info!("Stopping {}", self.spec.name);

        if let Some(status) = child.try_wait()? {
            warn!("{} had already exited ({})", self.spec.name, status);
            self.state = ProcessState::Stopped;
            return Ok(());
        }

        terminate(&child);

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited ({})", self.spec.name, status),
            Ok(Err(e)) => {
                self.state = ProcessState::Failed;
                return Err(self.stop_error(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}, killing",
                    self.spec.name, STOP_GRACE_PERIOD
                );
                if let Err(e) = child.kill().await {
                    self.state = ProcessState::Failed;
                    return Err(self.stop_error(e.to_string()));
                }
            }
        }

        self.state = ProcessState::Stopped;
        Ok(())
    }

    fn startup_error(&self, message: String) -> ExtractorError {
        ExtractorError::StartupFailed {
            component: self.spec.name.clone(),
            message,
        }
    }

    fn stop_error(&self, message: String) -> ExtractorError {
        ExtractorError::StopFailed {
            component: self.spec.name.clone(),
            message,
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not yet reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &Child) {
    let _ = child;
}

/// Reserves a free local TCP port.
///
/// The port is released before returning, so another process may race for it.
pub fn allocate_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
