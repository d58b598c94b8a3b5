pub mod client;
pub mod types;

pub use client::{client_from_kubeconfig, DiscoveryClient, KubeDiscoveryClient};
pub use types::{ApiServiceDescriptor, GroupVersion, ServiceRef, ServingParameters, OPENAPI_V2_PATH};
