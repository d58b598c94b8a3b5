//! Installs APIService manifests into a control plane.
//!
//! Every referenced Service becomes an `ExternalName` Service pointing at the
//! local host, so the aggregator routes requests to the aggregated server the
//! extractor runs outside the cluster. A self-signed serving certificate is
//! generated for that server and published as the APIServices' CA bundle.

use super::{load_api_services, Registration, ServiceRegistrar};
use crate::controlplane::ControlPlaneEndpoint;
use crate::k8s::{client_from_kubeconfig, ApiServiceDescriptor, ServiceRef, ServingParameters};
use crate::process::allocate_port;
use crate::{ExtractorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service, ServicePort, ServiceSpec};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SERVING_HOST: &str = "127.0.0.1";
const EXTERNAL_NAME: &str = "localhost";
const AVAILABILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct KubeServiceRegistrar {
    paths: Vec<PathBuf>,
    error_if_missing: bool,
    cert_dir: Option<TempDir>,
    client: Option<Client>,
    installed: Vec<String>,
}

impl KubeServiceRegistrar {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            error_if_missing: true,
            cert_dir: None,
            client: None,
            installed: Vec::new(),
        }
    }

    pub fn error_if_missing(mut self, error_if_missing: bool) -> Self {
        self.error_if_missing = error_if_missing;
        self
    }

    async fn ensure_namespace(&self, client: &Client, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                debug!("Created namespace {}", name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(ExtractorError::KubernetesError(format!(
                "Failed to create namespace {}: {}",
                name, e
            ))),
        }
    }

    async fn create_service(&self, client: &Client, service: &ServiceRef, port: u16) -> Result<()> {
        self.ensure_namespace(client, &service.namespace).await?;

        let services: Api<Service> = Api::namespaced(client.clone(), &service.namespace);
        services
            .create(&PostParams::default(), &external_service(service, port))
            .await
            .map_err(|e| {
                ExtractorError::KubernetesError(format!(
                    "Failed to create service {}/{}: {}",
                    service.namespace, service.name, e
                ))
            })?;

        debug!(
            "Created service {}/{} -> {}:{}",
            service.namespace, service.name, EXTERNAL_NAME, port
        );
        Ok(())
    }

    async fn unavailable(&self, client: &Client) -> Vec<String> {
        let api: Api<APIService> = Api::all(client.clone());
        let mut unavailable = Vec::new();

        for name in &self.installed {
            match api.get(name).await {
                Ok(api_service) if is_available(&api_service) => {}
                Ok(_) => unavailable.push(name.clone()),
                Err(e) => {
                    debug!("Failed to get api service {}: {}", name, e);
                    unavailable.push(name.clone());
                }
            }
        }

        unavailable
    }
}

#[async_trait]
impl ServiceRegistrar for KubeServiceRegistrar {
    async fn install(&mut self, endpoint: &ControlPlaneEndpoint) -> Result<Registration> {
        let manifests = load_api_services(&self.paths, self.error_if_missing)?;
        let descriptors = manifests
            .iter()
            .map(ApiServiceDescriptor::from_api_service)
            .collect::<Result<Vec<_>>>()?;

        let port = allocate_port()?;
        let cert_dir = tempfile::Builder::new()
            .prefix("openapi-extractor-serving-")
            .tempdir()?;
        let ca_bundle = write_serving_certificate(cert_dir.path(), &descriptors)?;

        let registration = Registration::new(
            descriptors,
            ServingParameters {
                host: SERVING_HOST.to_string(),
                port,
                cert_dir: cert_dir.path().to_path_buf(),
            },
        )?;
        self.cert_dir = Some(cert_dir);

        let client = client_from_kubeconfig(&endpoint.kubeconfig).await?;

        let mut services: Vec<&ServiceRef> = Vec::new();
        for descriptor in registration.api_services() {
            if !services.contains(&&descriptor.service) {
                services.push(&descriptor.service);
            }
        }
        for service in services {
            self.create_service(&client, service, port).await?;
        }

        let api: Api<APIService> = Api::all(client.clone());
        for manifest in manifests {
            let api_service = rewrite_api_service(manifest, port, &ca_bundle);
            let name = api_service.metadata.name.clone().unwrap_or_default();
            api.create(&PostParams::default(), &api_service)
                .await
                .map_err(|e| {
                    ExtractorError::KubernetesError(format!(
                        "Failed to create api service {}: {}",
                        name, e
                    ))
                })?;
            info!("Installed api service {}", name);
            self.installed.push(name);
        }

        self.client = Some(client);
        Ok(registration)
    }

    async fn wait_until_available(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| {
            ExtractorError::KubernetesError("api services are not installed".to_string())
        })?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let unavailable = self.unavailable(client).await;
            if unavailable.is_empty() {
                info!("All api services are available");
                return Ok(());
            }
            debug!("Waiting for api services: {}", unavailable.join(", "));

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExtractorError::Cancelled),
                _ = &mut deadline => {
                    return Err(ExtractorError::ApiServicesUnavailable { timeout, unavailable });
                }
                _ = tokio::time::sleep(AVAILABILITY_POLL_INTERVAL) => {}
            }
        }
    }
}

fn is_available(api_service: &APIService) -> bool {
    api_service
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
        .unwrap_or(false)
}

fn external_service(service: &ServiceRef, port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(service.name.clone()),
            namespace: Some(service.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(EXTERNAL_NAME.to_string()),
            ports: Some(vec![ServicePort {
                port: i32::from(port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Points an APIService at the local serving port and trusts `ca_bundle`.
fn rewrite_api_service(mut api_service: APIService, port: u16, ca_bundle: &str) -> APIService {
    api_service.metadata.resource_version = None;
    api_service.metadata.uid = None;
    api_service.status = None;

    let spec = api_service.spec.get_or_insert_with(Default::default);
    if let Some(service) = spec.service.as_mut() {
        service.port = Some(i32::from(port));
    }
    spec.ca_bundle = Some(ByteString(ca_bundle.as_bytes().to_vec()));
    spec.insecure_skip_tls_verify = None;

    api_service
}

/// Writes `apiserver.crt` / `apiserver.key` into `dir` and returns the certificate PEM.
fn write_serving_certificate(dir: &Path, descriptors: &[ApiServiceDescriptor]) -> Result<String> {
    let mut names = vec![EXTERNAL_NAME.to_string(), SERVING_HOST.to_string()];
    for descriptor in descriptors {
        let dns_name = descriptor.service.dns_name();
        if !names.contains(&dns_name) {
            names.push(dns_name);
        }
    }

    let certified = rcgen::generate_simple_self_signed(names).map_err(|e| {
        ExtractorError::StartupFailed {
            component: "serving certificate".to_string(),
            message: e.to_string(),
        }
    })?;

    let cert_pem = certified.cert.pem();
    fs::write(dir.join("apiserver.crt"), &cert_pem)?;
    fs::write(dir.join("apiserver.key"), certified.key_pair.serialize_pem())?;

    Ok(cert_pem)
}
