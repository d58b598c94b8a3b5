pub mod local;

use crate::k8s::DiscoveryClient;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use local::LocalControlPlane;

/// How the rest of the run reaches a started control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneEndpoint {
    pub etcd_servers: Vec<String>,
    pub api_server_url: String,
    pub kubeconfig: PathBuf,
}

/// Ephemeral data store plus primary API server.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn start(&mut self, cancel: &CancellationToken) -> Result<ControlPlaneEndpoint>;

    /// Client for discovery paths served through the primary API server.
    async fn discovery(&self) -> Result<Arc<dyn DiscoveryClient>>;

    async fn stop(&mut self) -> Result<()>;
}
