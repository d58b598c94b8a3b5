//! Control plane assembled from local `etcd` and `kube-apiserver` binaries.

use super::{ControlPlane, ControlPlaneEndpoint};
use crate::k8s::{DiscoveryClient, KubeDiscoveryClient};
use crate::process::{allocate_port, HealthCheck, ManagedProcess, ProcessSpec};
use crate::{ExtractorError, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const ETCD_BINARY: &str = "etcd";
const API_SERVER_BINARY: &str = "kube-apiserver";
const SERVICE_CLUSTER_IP_RANGE: &str = "10.0.0.0/24";
const SERVICE_ACCOUNT_ISSUER: &str = "https://kubernetes.default.svc";

#[derive(Debug, Clone)]
pub struct LocalControlPlaneOptions {
    /// Directory holding the `etcd` and `kube-apiserver` binaries.
    pub assets_dir: PathBuf,
    pub attach_output: bool,
    pub startup_timeout: Duration,
}

pub struct LocalControlPlane {
    options: LocalControlPlaneOptions,
    work_dir: Option<TempDir>,
    etcd: Option<ManagedProcess>,
    api_server: Option<ManagedProcess>,
    kubeconfig: Option<PathBuf>,
}

impl LocalControlPlane {
    pub fn new(options: LocalControlPlaneOptions) -> Self {
        Self {
            options,
            work_dir: None,
            etcd: None,
            api_server: None,
            kubeconfig: None,
        }
    }

    fn binary(&self, name: &str) -> Result<PathBuf> {
        let path = self.options.assets_dir.join(name);
        if !path.is_file() {
            return Err(startup_error(format!(
                "{} not found in {} (set --control-plane-assets or KUBEBUILDER_ASSETS)",
                name,
                self.options.assets_dir.display()
            )));
        }
        Ok(path)
    }

    fn etcd_spec(&self, program: PathBuf, work_dir: &Path) -> Result<(ProcessSpec, String)> {
        let client_port = allocate_port()?;
        let peer_port = allocate_port()?;
        let client_url = format!("http://127.0.0.1:{}", client_port);
        let peer_url = format!("http://127.0.0.1:{}", peer_port);

        let spec = ProcessSpec {
            name: "etcd".to_string(),
            program,
            args: vec![
                format!("--data-dir={}", work_dir.join("etcd").display()),
                format!("--listen-client-urls={}", client_url),
                format!("--advertise-client-urls={}", client_url),
                format!("--listen-peer-urls={}", peer_url),
                format!("--initial-advertise-peer-urls={}", peer_url),
                format!("--initial-cluster=default={}", peer_url),
                "--unsafe-no-fsync=true".to_string(),
            ],
            health: Some(HealthCheck::http(format!("{}/health", client_url))),
            startup_timeout: self.options.startup_timeout,
            attach_output: self.options.attach_output,
        };

        Ok((spec, client_url))
    }

    fn api_server_spec(
        &self,
        program: PathBuf,
        work_dir: &Path,
        etcd_url: &str,
        token: &str,
    ) -> Result<(ProcessSpec, String)> {
        let port = allocate_port()?;
        let url = format!("https://127.0.0.1:{}", port);

        let token_file = work_dir.join("tokens.csv");
        fs::write(&token_file, format!("{},admin,admin,system:masters\n", token))?;

        let key_file = work_dir.join("sa.key");
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| startup_error(format!("service account key: {}", e)))?;
        fs::write(&key_file, key_pair.serialize_pem())?;

        let cert_dir = work_dir.join("apiserver-certs");
        fs::create_dir_all(&cert_dir)?;

        let spec = ProcessSpec {
            name: "kube-apiserver".to_string(),
            program,
            args: vec![
                "--advertise-address=127.0.0.1".to_string(),
                "--bind-address=127.0.0.1".to_string(),
                format!("--secure-port={}", port),
                format!("--etcd-servers={}", etcd_url),
                format!("--cert-dir={}", cert_dir.display()),
                format!("--service-cluster-ip-range={}", SERVICE_CLUSTER_IP_RANGE),
                "--allow-privileged=true".to_string(),
                "--authorization-mode=AlwaysAllow".to_string(),
                "--disable-admission-plugins=ServiceAccount".to_string(),
                format!("--token-auth-file={}", token_file.display()),
                format!("--service-account-issuer={}", SERVICE_ACCOUNT_ISSUER),
                format!("--service-account-key-file={}", key_file.display()),
                format!("--service-account-signing-key-file={}", key_file.display()),
            ],
            health: Some(HealthCheck::insecure_https(format!("{}/readyz", url))),
            startup_timeout: self.options.startup_timeout,
            attach_output: self.options.attach_output,
        };

        Ok((spec, url))
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    async fn start(&mut self, cancel: &CancellationToken) -> Result<ControlPlaneEndpoint> {
        let etcd_binary = self.binary(ETCD_BINARY)?;
        let api_server_binary = self.binary(API_SERVER_BINARY)?;

        let work_dir = tempfile::Builder::new()
            .prefix("openapi-extractor-")
            .tempdir()?;
        let work_path = work_dir.path().to_path_buf();
        self.work_dir = Some(work_dir);
        debug!("Control plane working directory: {}", work_path.display());

        let (etcd_spec, etcd_url) = self.etcd_spec(etcd_binary, &work_path)?;
        let etcd = self.etcd.insert(ManagedProcess::new(etcd_spec));
        etcd.start(cancel).await?;

        let token = generate_token();
        let (api_server_spec, api_server_url) =
            self.api_server_spec(api_server_binary, &work_path, &etcd_url, &token)?;
        let api_server = self.api_server.insert(ManagedProcess::new(api_server_spec));
        api_server.start(cancel).await?;

        let kubeconfig = work_path.join("kubeconfig");
        write_kubeconfig(&kubeconfig, &api_server_url, &token)?;
        self.kubeconfig = Some(kubeconfig.clone());

        info!("Control plane is running at {}", api_server_url);

        Ok(ControlPlaneEndpoint {
            etcd_servers: vec![etcd_url],
            api_server_url,
            kubeconfig,
        })
    }

    async fn discovery(&self) -> Result<Arc<dyn DiscoveryClient>> {
        let kubeconfig = self.kubeconfig.as_ref().ok_or_else(|| {
            ExtractorError::KubernetesError("control plane is not running".to_string())
        })?;
        let client = KubeDiscoveryClient::from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(client))
    }

    async fn stop(&mut self) -> Result<()> {
        let mut failures = Vec::new();

        // kube-apiserver depends on etcd, so it goes first.
        for process in [self.api_server.as_mut(), self.etcd.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = process.stop().await {
                failures.push(e.to_string());
            }
        }

        self.kubeconfig = None;
        if let Some(work_dir) = self.work_dir.take() {
            if let Err(e) = work_dir.close() {
                failures.push(format!("removing working directory: {}", e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExtractorError::StopFailed {
                component: "control plane".to_string(),
                message: failures.join("; "),
            })
        }
    }
}

fn startup_error(message: String) -> ExtractorError {
    ExtractorError::StartupFailed {
        component: "control plane".to_string(),
        message,
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn write_kubeconfig(path: &Path, server: &str, token: &str) -> Result<()> {
    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "openapi-extractor",
            "cluster": { "server": server, "insecure-skip-tls-verify": true }
        }],
        "users": [{
            "name": "admin",
            "user": { "token": token }
        }],
        "contexts": [{
            "name": "openapi-extractor",
            "context": { "cluster": "openapi-extractor", "user": "admin" }
        }],
        "current-context": "openapi-extractor"
    });

    let contents = serde_yaml::to_string(&kubeconfig)
        .map_err(|e| startup_error(format!("kubeconfig: {}", e)))?;
    fs::write(path, contents)?;
    Ok(())
}
