//! Fetching OpenAPI documents and handing them to persistence.
//!
//! Documents are fetched one at a time in registration order. The first
//! failure stops extraction; files written before it stay on disk.

use crate::k8s::{DiscoveryClient, GroupVersion, OPENAPI_V2_PATH};
use crate::persist::write_json;
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// File name of the aggregated v2 document.
pub const V2_FILE_NAME: &str = "swagger.json";
/// Subdirectory holding the per group-version v3 documents.
pub const V3_DIR: &str = "v3";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub written: Vec<PathBuf>,
}

pub struct SpecExtractor {
    client: Arc<dyn DiscoveryClient>,
    output_dir: PathBuf,
}

impl SpecExtractor {
    pub fn new(client: Arc<dyn DiscoveryClient>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
        }
    }

    /// Extracts v2, then every v3 document. `summary` collects written files
    /// even when a later fetch fails.
    pub async fn extract_all(
        &self,
        group_versions: &[GroupVersion],
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        summary.written.push(self.extract_v2().await?);
        for gv in group_versions {
            summary.written.push(self.extract_v3(gv).await?);
        }
        Ok(())
    }

    pub async fn extract_v2(&self) -> Result<PathBuf> {
        info!("Extracting OpenAPI v2");

        let body = self.client.get(OPENAPI_V2_PATH).await?;
        write_json(&self.output_dir, V2_FILE_NAME, &body)
    }

    pub async fn extract_v3(&self, gv: &GroupVersion) -> Result<PathBuf> {
        info!("Extracting OpenAPI v3 for {}", gv);

        let body = self.client.get(&gv.openapi_v3_path()).await?;
        write_json(&self.output_dir.join(V3_DIR), &gv.openapi_file_name(), &body)
    }
}
