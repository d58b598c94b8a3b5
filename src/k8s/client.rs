use crate::{ExtractorError, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use tracing::{debug, info};

/// Minimal HTTP surface needed against discovery paths.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Existence probe without transferring a body.
    async fn head(&self, path: &str) -> Result<()>;

    /// Fetches the raw body served at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
}

/// Discovery client talking to the control plane through `kube::Client`.
#[derive(Clone)]
pub struct KubeDiscoveryClient {
    client: Client,
}

impl KubeDiscoveryClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        debug!("Initializing Kubernetes client from {}", path.display());

        let client = client_from_kubeconfig(path).await?;

        info!("Connected discovery client to control plane");

        Ok(Self { client })
    }

    async fn request(&self, method: http::Method, path: &str) -> Result<String> {
        let request = http::Request::builder()
            .method(method)
            .uri(path)
            .body(Vec::new())
            .map_err(|e| ExtractorError::FetchFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .request_text(request)
            .await
            .map_err(|e| ExtractorError::FetchFailed {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl DiscoveryClient for KubeDiscoveryClient {
    async fn head(&self, path: &str) -> Result<()> {
        self.request(http::Method::HEAD, path).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let body = self.request(http::Method::GET, path).await?;
        Ok(body.into_bytes())
    }
}

/// Builds a `kube::Client` from a kubeconfig file on disk.
pub async fn client_from_kubeconfig(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        ExtractorError::KubernetesError(format!(
            "Failed to read kubeconfig {}: {}",
            path.display(),
            e
        ))
    })?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ExtractorError::KubernetesError(format!("Invalid kubeconfig: {}", e)))?;

    Client::try_from(config).map_err(|e| {
        ExtractorError::KubernetesError(format!("Failed to create K8s client: {}", e))
    })
}
