//! Drivers described by a YAML manifest
//!
//! Lets any installed CSI driver be tested without writing Rust: the manifest
//! names the driver, the storage class to provision from, and the auth
//! parameters and secret payloads the driver expects.
//!
//! ```yaml
//! driverInfo:
//!   name: hostpath.csi.k8s.io
//!   supportedFsType: ["", ext4]
//! storageClass:
//!   parameters: { type: fast }
//! auth:
//!   secretData:
//!     - { username: alice, password: s3cret }
//!   storageClassParameters:
//!     csi.storage.k8s.io/node-stage-secret-name: auth-stage
//!     csi.storage.k8s.io/node-stage-secret-namespace: ${namespace}
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::framework::size::parse_quantity;
use crate::framework::{
    AuthTestDriver, CsiStorageClassAuthParamKey, DriverCleanup, DriverInfo, DynamicPvTestDriver,
    Framework, NodeSelection, PerTestConfig, TestDriver, Timeouts,
};
use crate::{Error, Result};

/// Placeholder replaced with the per-test namespace in parameter values
pub const NAMESPACE_PLACEHOLDER: &str = "${namespace}";

/// Storage-class parameter carrying the filesystem type
pub const FS_TYPE_PARAM: &str = "csi.storage.k8s.io/fstype";

/// On-disk driver definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverManifest {
    /// Static driver description
    pub driver_info: DriverInfo,
    /// Storage class to provision test volumes from
    pub storage_class: StorageClassTemplate,
    /// Auth settings; a manifest without them does not support the auth suite
    pub auth: Option<AuthManifest>,
    /// Node label selector for client pods
    pub client_node_selector: BTreeMap<String, String>,
    /// Pin client pods to a node
    pub client_node_name: Option<String>,
    /// Driver-specific wait limits
    pub timeouts: Option<DriverTimeouts>,
}

/// Wait limits a driver may override, in seconds.
///
/// The short pod start timeout belongs to the suite configuration, so
/// `podStartSecs` is rejected here. Unset values use the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DriverTimeouts {
    /// How long a pod may take to disappear after deletion
    pub pod_delete_secs: Option<u64>,
    /// How long a claim or volume may take to be deleted
    pub claim_delete_secs: Option<u64>,
    /// Polling interval for all waits
    pub poll_interval_secs: Option<u64>,
}

impl From<&DriverTimeouts> for Timeouts {
    fn from(cfg: &DriverTimeouts) -> Self {
        let defaults = Timeouts::default();
        Timeouts {
            pod_start_short: defaults.pod_start_short,
            pod_delete: cfg
                .pod_delete_secs
                .map_or(defaults.pod_delete, Duration::from_secs),
            claim_delete: cfg
                .claim_delete_secs
                .map_or(defaults.claim_delete, Duration::from_secs),
            poll_interval: cfg
                .poll_interval_secs
                .map_or(defaults.poll_interval, |secs| Duration::from_secs(secs.max(1))),
        }
    }
}

/// Storage class fields the manifest controls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageClassTemplate {
    /// Provisioner name; defaults to the driver name
    pub provisioner: Option<String>,
    /// Non-auth parameters
    pub parameters: BTreeMap<String, String>,
    /// `Immediate` or `WaitForFirstConsumer`
    pub volume_binding_mode: Option<String>,
    /// `Delete` or `Retain`
    pub reclaim_policy: Option<String>,
    /// Mount options passed to the driver
    pub mount_options: Vec<String>,
}

/// Auth section of a manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthManifest {
    /// Secret payloads; the first one is used for the main storage class
    pub secret_data: Vec<BTreeMap<String, String>>,
    /// Groups of CSI secret-name parameters that must carry the same credential
    pub match_groups: Vec<Vec<String>>,
    /// CSI secret parameters added to the storage class
    pub storage_class_parameters: BTreeMap<String, String>,
}

/// A [`TestDriver`] backed by a [`DriverManifest`]
#[derive(Debug, Clone)]
pub struct ManifestDriver {
    manifest: DriverManifest,
    match_groups: Vec<Vec<CsiStorageClassAuthParamKey>>,
}

impl ManifestDriver {
    /// Parse and validate a manifest
    pub fn from_yaml(data: &str) -> Result<Self> {
        let manifest: DriverManifest = serde_yaml::from_str(data)?;
        Self::new(manifest)
    }

    /// Read, parse and validate a manifest file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let driver = Self::from_yaml(&data).map_err(|e| match e {
            Error::Serialization { message } => {
                Error::serialization(format!("failed to parse {}: {message}", path.display()))
            }
            other => other,
        })?;
        debug!(
            path = %path.display(),
            driver = %driver.manifest.driver_info.name,
            "Loaded driver manifest"
        );
        Ok(driver)
    }

    /// Validate a manifest and resolve its match groups
    pub fn new(manifest: DriverManifest) -> Result<Self> {
        if manifest.driver_info.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                "driverInfo.name",
                "driver name must not be empty",
            ));
        }

        let range = &manifest.driver_info.supported_size_range;
        for (field, value) in [("min", &range.min), ("max", &range.max)] {
            if let Some(q) = value {
                parse_quantity(q).map_err(|_| {
                    Error::validation_for_field(
                        format!("driverInfo.supportedSizeRange.{field}"),
                        format!("invalid quantity '{q}'"),
                    )
                })?;
            }
        }

        let mut match_groups = Vec::new();
        if let Some(auth) = &manifest.auth {
            for (i, group) in auth.match_groups.iter().enumerate() {
                let keys = group
                    .iter()
                    .enumerate()
                    .map(|(j, key)| {
                        key.parse::<CsiStorageClassAuthParamKey>().map_err(|_| {
                            Error::validation_for_field(
                                format!("auth.matchGroups[{i}][{j}]"),
                                format!("unknown CSI auth parameter key '{key}'"),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                match_groups.push(keys);
            }

            for key in auth.storage_class_parameters.keys() {
                if manifest.storage_class.parameters.contains_key(key) {
                    return Err(Error::validation_for_field(
                        format!("auth.storageClassParameters.{key}"),
                        "parameter is also set in storageClass.parameters",
                    ));
                }
            }
        }

        Ok(Self {
            manifest,
            match_groups,
        })
    }

    /// The manifest this driver was built from
    pub fn manifest(&self) -> &DriverManifest {
        &self.manifest
    }
}

/// Replace [`NAMESPACE_PLACEHOLDER`] in every value
fn substitute_namespace(
    params: &BTreeMap<String, String>,
    namespace: &str,
) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), v.replace(NAMESPACE_PLACEHOLDER, namespace)))
        .collect()
}

#[async_trait]
impl TestDriver for ManifestDriver {
    fn driver_info(&self) -> &DriverInfo {
        &self.manifest.driver_info
    }

    async fn prepare_test(
        &self,
        framework: &Framework,
    ) -> Result<(PerTestConfig, Option<DriverCleanup>)> {
        let config = PerTestConfig {
            driver_name: self.manifest.driver_info.name.clone(),
            prefix: framework.namespace().to_string(),
            framework_namespace: framework.namespace().to_string(),
            client_node_selection: NodeSelection {
                name: self.manifest.client_node_name.clone(),
                selector: self.manifest.client_node_selector.clone(),
            },
        };
        Ok((config, None))
    }

    fn timeouts(&self) -> Option<Timeouts> {
        self.manifest.timeouts.as_ref().map(Timeouts::from)
    }

    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        Some(self)
    }

    fn as_auth(&self) -> Option<&dyn AuthTestDriver> {
        self.manifest.auth.is_some().then_some(self as &dyn AuthTestDriver)
    }
}

impl DynamicPvTestDriver for ManifestDriver {
    fn dynamic_provisioner_storage_class(
        &self,
        config: &PerTestConfig,
        fs_type: &str,
    ) -> Option<StorageClass> {
        let info = &self.manifest.driver_info;
        if !info.supports_fs_type(fs_type) {
            return None;
        }

        let template = &self.manifest.storage_class;
        let mut parameters =
            substitute_namespace(&template.parameters, &config.framework_namespace);
        if !fs_type.is_empty() {
            parameters.insert(FS_TYPE_PARAM.to_string(), fs_type.to_string());
        }
        parameters.extend(self.storage_class_auth_parameters(config));

        Some(StorageClass {
            provisioner: template.provisioner.clone().unwrap_or_else(|| info.name.clone()),
            parameters: Some(parameters),
            volume_binding_mode: template.volume_binding_mode.clone(),
            reclaim_policy: template.reclaim_policy.clone(),
            mount_options: (!template.mount_options.is_empty())
                .then(|| template.mount_options.clone()),
            ..Default::default()
        })
    }
}

impl AuthTestDriver for ManifestDriver {
    fn auth_secret_data(&self) -> Vec<BTreeMap<String, String>> {
        self.manifest
            .auth
            .as_ref()
            .map(|a| a.secret_data.clone())
            .unwrap_or_default()
    }

    fn auth_match_group(&self) -> Option<Vec<Vec<CsiStorageClassAuthParamKey>>> {
        (!self.match_groups.is_empty()).then(|| self.match_groups.clone())
    }

    fn storage_class_auth_parameters(&self, config: &PerTestConfig) -> BTreeMap<String, String> {
        self.manifest
            .auth
            .as_ref()
            .map(|a| substitute_namespace(&a.storage_class_parameters, &config.framework_namespace))
            .unwrap_or_default()
    }
}
