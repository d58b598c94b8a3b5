//! Loading APIService definitions from manifest files.

use crate::{ExtractorError, Result};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];
const API_SERVICE_KIND: &str = "APIService";

/// Reads every APIService declared under `paths`, in path, file and document order.
///
/// Each path may be a directory or a single manifest file.
pub fn load_api_services(paths: &[PathBuf], error_if_missing: bool) -> Result<Vec<APIService>> {
    let mut api_services = Vec::new();

    for path in paths {
        if !path.exists() {
            if error_if_missing {
                return Err(ExtractorError::ManifestPathMissing(path.clone()));
            }
            debug!("Skipping missing api service path {}", path.display());
            continue;
        }

        for file in manifest_files(path)? {
            api_services.extend(read_manifest(&file)?);
        }
    }

    if api_services.is_empty() {
        return Err(ExtractorError::NoApiServices {
            paths: paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    Ok(api_services)
}

fn manifest_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        let is_manifest = file
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| MANIFEST_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if file.is_file() && is_manifest {
            files.push(file);
        }
    }
    files.sort();

    Ok(files)
}

fn read_manifest(file: &Path) -> Result<Vec<APIService>> {
    debug!("Reading api service manifest {}", file.display());

    let contents = fs::read_to_string(file)?;
    let invalid = |message: String| ExtractorError::InvalidManifest {
        name: file.display().to_string(),
        message,
    };

    let mut api_services = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&contents) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| invalid(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) != Some(API_SERVICE_KIND) {
            continue;
        }
        let api_service: APIService =
            serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))?;
        api_services.push(api_service);
    }

    Ok(api_services)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPUTE: &str = r#"
apiVersion: apiregistration.k8s.io/v1
kind: APIService
metadata:
  name: v1alpha1.compute.example.com
spec:
  group: compute.example.com
  version: v1alpha1
  service:
    name: apiserver-service
    namespace: system
  groupPriorityMinimum: 100
  versionPriority: 100
---
apiVersion: v1
kind: Service
metadata:
  name: apiserver-service
---
apiVersion: apiregistration.k8s.io/v1
kind: APIService
metadata:
  name: v1beta1.compute.example.com
spec:
  group: compute.example.com
  version: v1beta1
  service:
    name: apiserver-service
    namespace: system
  groupPriorityMinimum: 100
  versionPriority: 90
"#;

    const STORAGE: &str = r#"
apiVersion: apiregistration.k8s.io/v1
kind: APIService
metadata:
  name: v1alpha1.storage.example.com
spec:
  group: storage.example.com
  version: v1alpha1
  service:
    name: apiserver-service
    namespace: system
  groupPriorityMinimum: 100
  versionPriority: 100
"#;

    fn names(api_services: &[APIService]) -> Vec<String> {
        api_services
            .iter()
            .map(|s| s.metadata.name.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_loads_in_file_and_document_order() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b-storage.yaml"), STORAGE).unwrap();
        fs::write(tmp.path().join("a-compute.yaml"), COMPUTE).unwrap();
        fs::write(tmp.path().join("README.md"), "not a manifest").unwrap();

        let api_services = load_api_services(&[tmp.path().to_path_buf()], true).unwrap();

        assert_eq!(
            names(&api_services),
            vec![
                "v1alpha1.compute.example.com",
                "v1beta1.compute.example.com",
                "v1alpha1.storage.example.com",
            ]
        );
    }

    #[test]
    fn test_accepts_single_file_path() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("storage.yml");
        fs::write(&file, STORAGE).unwrap();

        let api_services = load_api_services(&[file], true).unwrap();

        assert_eq!(names(&api_services), vec!["v1alpha1.storage.example.com"]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("does-not-exist");

        let err = load_api_services(&[missing.clone()], true).unwrap_err();

        assert!(matches!(err, ExtractorError::ManifestPathMissing(p) if p == missing));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();

        let err = load_api_services(&[tmp.path().to_path_buf()], true).unwrap_err();

        assert!(matches!(err, ExtractorError::NoApiServices { .. }));
    }

    #[test]
    fn test_malformed_manifest_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("broken.yaml"),
            "kind: APIService\nspec:\n  versionPriority: high\n",
        )
        .unwrap();

        let err = load_api_services(&[tmp.path().to_path_buf()], true).unwrap_err();

        assert!(matches!(err, ExtractorError::InvalidManifest { .. }));
    }
}
