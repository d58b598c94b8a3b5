use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use std::fmt;
use std::path::PathBuf;

use crate::{ExtractorError, Result};

/// Discovery path of the aggregated OpenAPI v2 document.
pub const OPENAPI_V2_PATH: &str = "/openapi/v2";

/// An API group and version pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Discovery path serving this group-version's OpenAPI v3 document.
    pub fn openapi_v3_path(&self) -> String {
        format!("/openapi/v3/apis/{}/{}", self.group, self.version)
    }

    /// File name the v3 document is persisted under.
    pub fn openapi_file_name(&self) -> String {
        format!("apis__{}__{}_openapi.json", self.group, self.version)
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Namespaced reference to the Service an APIService routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    /// In-cluster DNS name the aggregator verifies the serving certificate against.
    pub fn dns_name(&self) -> String {
        format!("{}.{}.svc", self.name, self.namespace)
    }
}

/// One declared APIService, reduced to what the extractor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServiceDescriptor {
    pub name: String,
    pub group_version: GroupVersion,
    pub service: ServiceRef,
}

impl ApiServiceDescriptor {
    pub fn from_api_service(api_service: &APIService) -> Result<Self> {
        let name = api_service.metadata.name.clone().unwrap_or_default();
        let invalid = |message: &str| ExtractorError::InvalidManifest {
            name: name.clone(),
            message: message.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("metadata.name is required"));
        }

        let spec = api_service
            .spec
            .as_ref()
            .ok_or_else(|| invalid("spec is required"))?;

        let group = spec
            .group
            .clone()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| invalid("spec.group is required"))?;
        let version = spec
            .version
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid("spec.version is required"))?;

        let service = spec
            .service
            .as_ref()
            .ok_or_else(|| invalid("spec.service is required"))?;
        let service = ServiceRef {
            namespace: service
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            name: service
                .name
                .clone()
                .ok_or_else(|| invalid("spec.service.name is required"))?,
        };

        Ok(Self {
            name,
            group_version: GroupVersion::new(group, version),
            service,
        })
    }
}

/// Where the aggregated server must listen and find its certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingParameters {
    pub host: String,
    pub port: u16,
    pub cert_dir: PathBuf,
}
