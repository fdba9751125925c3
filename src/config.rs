//! Release manifest loading and validation.
use std::{collections::BTreeMap, env, fs};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{BOOTSTRAP_SERVICE, ENV_RELEASE},
    error::ManifestError,
    model::{PlacementOptions, Release},
};

/// Template for one service in a release manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    /// Container image to deploy.
    pub image: String,
    /// Optional command override.
    #[serde(default)]
    pub command: Option<String>,
    /// Environment for the service's instances.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Ports the service exposes.
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    /// Placement requirements and rank for the service's instances.
    #[serde(default)]
    pub placement: Option<PlacementOptions>,
}

/// A release manifest as read from a file or the `RELEASE` environment
/// variable. The name is injected at bootstrap, so it may be absent here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Release name, if the manifest carries one.
    #[serde(default)]
    pub name: Option<String>,
    /// Map of service names to their templates.
    pub services: BTreeMap<String, ServiceTemplate>,
}

impl ReleaseManifest {
    /// Converts the manifest into an immutable release record under the
    /// given name.
    pub fn into_release(self, name: &str) -> Release {
        Release {
            name: name.to_string(),
            services: self.services,
        }
    }

    /// Service names that become instances: everything except `_bootstrap`.
    pub fn deployable_services(&self) -> impl Iterator<Item = (&String, &ServiceTemplate)> {
        self.services
            .iter()
            .filter(|(name, _)| name.as_str() != BOOTSTRAP_SERVICE)
    }
}

/// Loads the release manifest, preferring an inline `RELEASE` environment
/// value over the manifest file at `path`.
pub fn load_manifest(path: Option<&str>) -> Result<ReleaseManifest, ManifestError> {
    let manifest: ReleaseManifest = match env::var(ENV_RELEASE) {
        Ok(inline) if !inline.trim().is_empty() => serde_yaml::from_str(&inline)?,
        _ => {
            let path = path.unwrap_or("release.yml");
            let raw = fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        }
    };

    validate(&manifest)?;
    Ok(manifest)
}

fn validate(manifest: &ReleaseManifest) -> Result<(), ManifestError> {
    if manifest.services.is_empty() {
        return Err(ManifestError::NoServices);
    }

    for (service, template) in &manifest.services {
        if template.image.trim().is_empty() {
            return Err(ManifestError::EmptyImage {
                service: service.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::env_lock;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MANIFEST: &str = r#"
services:
  _store:
    image: "gilliam/etcd:2"
    ports: [4001]
  api:
    image: "gilliam/api:1"
    command: "api --serve"
    env:
      PORT: "8080"
  _bootstrap:
    image: "gilliam/bootstrap:1"
"#;

    #[test]
    fn loads_manifest_from_file() {
        let _guard = env_lock();
        unsafe { env::remove_var(ENV_RELEASE) };

        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(MANIFEST.as_bytes()).expect("write manifest");

        let manifest =
            load_manifest(Some(file.path().to_str().unwrap())).expect("manifest should load");
        assert_eq!(manifest.services.len(), 3);
        assert_eq!(manifest.services["_store"].ports, Some(vec![4001]));
        assert_eq!(
            manifest.services["api"].command.as_deref(),
            Some("api --serve")
        );
    }

    #[test]
    fn env_value_overrides_file() {
        let _guard = env_lock();
        unsafe { env::set_var(ENV_RELEASE, MANIFEST) };

        let manifest = load_manifest(Some("/nonexistent/release.yml"))
            .expect("inline manifest should load");
        assert!(manifest.services.contains_key("api"));

        unsafe { env::remove_var(ENV_RELEASE) };
    }

    #[test]
    fn deployable_services_skip_bootstrap() {
        let manifest: ReleaseManifest = serde_yaml::from_str(MANIFEST).unwrap();
        let names: Vec<&str> = manifest
            .deployable_services()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["_store", "api"]);
    }

    #[test]
    fn empty_image_is_rejected() {
        let _guard = env_lock();
        unsafe {
            env::set_var(
                ENV_RELEASE,
                "services:\n  api:\n    image: \"  \"\n",
            )
        };

        let err = load_manifest(None).unwrap_err();
        assert!(matches!(err, ManifestError::EmptyImage { service } if service == "api"));

        unsafe { env::remove_var(ENV_RELEASE) };
    }

    #[test]
    fn manifest_without_services_is_rejected() {
        let _guard = env_lock();
        unsafe { env::set_var(ENV_RELEASE, "services: {}\n") };

        assert!(matches!(load_manifest(None), Err(ManifestError::NoServices)));

        unsafe { env::remove_var(ENV_RELEASE) };
    }

    #[test]
    fn manifest_into_release_tags_name() {
        let manifest: ReleaseManifest = serde_yaml::from_str(MANIFEST).unwrap();
        let release = manifest.into_release("1");
        assert_eq!(release.name, "1");
        assert!(release.services.contains_key("_store"));
    }
}
