use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::k8s::GroupVersion;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("API service path does not exist: {}", .0.display())]
    ManifestPathMissing(PathBuf),

    #[error("Invalid API service {name}: {message}")]
    InvalidManifest { name: String, message: String },

    #[error("No API services found in {paths}")]
    NoApiServices { paths: String },

    #[error("Group version {0} is declared by more than one API service")]
    DuplicateGroupVersion(GroupVersion),

    #[error("Failed to start {component}: {message}")]
    StartupFailed { component: String, message: String },

    #[error("Failed to build api server package {package}: {message}")]
    BuildFailed { package: String, message: String },

    #[error("Failed to stop {component}: {message}")]
    StopFailed { component: String, message: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error(
        "Timed out after {timeout:?} waiting for api services to become available: {}",
        .unavailable.join(", ")
    )]
    ApiServicesUnavailable {
        timeout: Duration,
        unavailable: Vec<String>,
    },

    #[error(
        "Timed out after {timeout:?} waiting for OpenAPI v3 of group versions: {}",
        join_group_versions(.unready)
    )]
    ReadinessTimeout {
        timeout: Duration,
        unready: Vec<GroupVersion>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to get path {path}: {message}")]
    FetchFailed { path: String, message: String },

    #[error("Malformed JSON for {name}: {source}")]
    InvalidJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractorError>;

fn join_group_versions(gvs: &[GroupVersion]) -> String {
    gvs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pipeline phase an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ControlPlane,
    Registration,
    ApiServer,
    ApiServiceAvailability,
    Readiness,
    Extraction,
    Persistence,
    Teardown,
}

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::ControlPlane => "control plane startup",
            Phase::Registration => "api service registration",
            Phase::ApiServer => "api server startup",
            Phase::ApiServiceAvailability => "api service availability",
            Phase::Readiness => "openapi readiness",
            Phase::Extraction => "openapi extraction",
            Phase::Persistence => "persistence",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error together with the phase it ended.
#[derive(Error, Debug)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: ExtractorError,
}

impl PhaseError {
    pub fn new(phase: Phase, source: ExtractorError) -> Self {
        Self { phase, source }
    }
}
