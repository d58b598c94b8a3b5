pub mod install;
pub mod manifests;

use crate::controlplane::ControlPlaneEndpoint;
use crate::k8s::{ApiServiceDescriptor, GroupVersion, ServingParameters};
use crate::{ExtractorError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use install::KubeServiceRegistrar;
pub use manifests::load_api_services;

/// Outcome of installing the declared API services.
#[derive(Debug, Clone)]
pub struct Registration {
    api_services: Vec<ApiServiceDescriptor>,
    pub serving: ServingParameters,
}

impl Registration {
    /// Rejects descriptors that declare the same group-version twice.
    pub fn new(
        api_services: Vec<ApiServiceDescriptor>,
        serving: ServingParameters,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for api_service in &api_services {
            if !seen.insert(&api_service.group_version) {
                return Err(ExtractorError::DuplicateGroupVersion(
                    api_service.group_version.clone(),
                ));
            }
        }

        Ok(Self {
            api_services,
            serving,
        })
    }

    pub fn api_services(&self) -> &[ApiServiceDescriptor] {
        &self.api_services
    }

    /// Registered group-versions in registration order.
    pub fn group_versions(&self) -> Vec<GroupVersion> {
        self.api_services
            .iter()
            .map(|s| s.group_version.clone())
            .collect()
    }
}

/// Installs API service definitions into a running control plane.
#[async_trait]
pub trait ServiceRegistrar: Send + Sync {
    async fn install(&mut self, endpoint: &ControlPlaneEndpoint) -> Result<Registration>;

    /// Waits until every installed API service reports `Available`.
    async fn wait_until_available(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
