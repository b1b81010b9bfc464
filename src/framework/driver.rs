//! Driver contract for storage test suites
//!
//! A driver advertises what it can do through [`DriverInfo`] and through the
//! optional capability traits it exposes via [`TestDriver::as_dynamic_pv`] and
//! [`TestDriver::as_auth`]. Suites check those capabilities before running.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::future::BoxFuture;
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};

use super::size::SizeRange;
use super::{Framework, Timeouts};
use crate::{Error, Result};

/// Optional features a driver may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Data survives pod restarts
    Persistence,
    /// Raw block volumes
    Block,
    /// Executables on the volume can be run
    Exec,
    /// Controller-side volume expansion
    ControllerExpansion,
    /// Node-side volume expansion
    NodeExpansion,
    /// Topology-aware provisioning
    Topology,
}

/// Static description of a driver under test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverInfo {
    /// Driver name, e.g. `hostpath.csi.k8s.io`
    pub name: String,
    /// Volume sizes the driver can provision
    pub supported_size_range: SizeRange,
    /// Filesystem types the driver accepts; `""` means the driver default
    pub supported_fs_type: BTreeSet<String>,
    /// Optional features and whether they are supported
    pub capabilities: BTreeMap<Capability, bool>,
}

impl DriverInfo {
    /// Whether the driver claims support for `cap`
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.get(&cap).copied().unwrap_or(false)
    }

    /// Whether the driver accepts `fs_type`; an empty set means "default only"
    pub fn supports_fs_type(&self, fs_type: &str) -> bool {
        if self.supported_fs_type.is_empty() {
            return fs_type.is_empty();
        }
        self.supported_fs_type.contains(fs_type)
    }
}

/// Where client pods for a test should run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSelection {
    /// Pin pods to a specific node
    pub name: Option<String>,
    /// Node label selector
    pub selector: BTreeMap<String, String>,
}

/// Per-test values handed out by [`TestDriver::prepare_test`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerTestConfig {
    /// Name of the driver that produced this config
    pub driver_name: String,
    /// Prefix for cluster-scoped objects the driver creates
    pub prefix: String,
    /// Namespace the test runs in
    pub framework_namespace: String,
    /// Where client pods should be scheduled
    pub client_node_selection: NodeSelection,
}

/// Deferred driver teardown returned by [`TestDriver::prepare_test`]
pub type DriverCleanup = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Base contract every driver implements.
#[async_trait]
pub trait TestDriver: Send + Sync {
    /// Static driver description
    fn driver_info(&self) -> &DriverInfo;

    /// Prepare the driver for one test and return the per-test config.
    ///
    /// The optional cleanup runs after the test, even when the test failed.
    async fn prepare_test(
        &self,
        framework: &Framework,
    ) -> Result<(PerTestConfig, Option<DriverCleanup>)>;

    /// Driver-specific timeouts; `None` keeps the suite defaults.
    ///
    /// `pod_start_short` is ignored: the suite configuration always decides it.
    fn timeouts(&self) -> Option<Timeouts> {
        None
    }

    /// Dynamic provisioning capability
    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        None
    }

    /// Storage-class authentication capability
    fn as_auth(&self) -> Option<&dyn AuthTestDriver> {
        None
    }
}

/// Drivers that can provision volumes from a storage class
pub trait DynamicPvTestDriver: Send + Sync {
    /// Storage class for dynamic provisioning, or `None` if `fs_type` is unsupported
    fn dynamic_provisioner_storage_class(
        &self,
        config: &PerTestConfig,
        fs_type: &str,
    ) -> Option<StorageClass>;
}

/// Drivers whose storage classes carry CSI secret parameters
pub trait AuthTestDriver: Send + Sync {
    /// Secret payloads; the first is the one the storage class is provisioned with
    fn auth_secret_data(&self) -> Vec<BTreeMap<String, String>>;

    /// Groups of CSI stages that must see the same credential
    fn auth_match_group(&self) -> Option<Vec<Vec<CsiStorageClassAuthParamKey>>>;

    /// CSI secret parameters of the storage class for this test
    fn storage_class_auth_parameters(&self, config: &PerTestConfig) -> BTreeMap<String, String>;
}

/// Well-known CSI storage-class secret parameter keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum CsiStorageClassAuthParamKey {
    ProvisionerSecretName,
    ProvisionerSecretNamespace,
    ControllerPublishSecretName,
    ControllerPublishSecretNamespace,
    NodeStageSecretName,
    NodeStageSecretNamespace,
    NodePublishSecretName,
    NodePublishSecretNamespace,
    ControllerExpandSecretName,
    ControllerExpandSecretNamespace,
    NodeExpandSecretName,
    NodeExpandSecretNamespace,
}

/// Parameters whose key ends with this name a secret
pub const SECRET_NAME_SUFFIX: &str = "secret-name";

impl CsiStorageClassAuthParamKey {
    /// Every key, in CSI call order
    pub const ALL: [CsiStorageClassAuthParamKey; 12] = [
        Self::ProvisionerSecretName,
        Self::ProvisionerSecretNamespace,
        Self::ControllerPublishSecretName,
        Self::ControllerPublishSecretNamespace,
        Self::NodeStageSecretName,
        Self::NodeStageSecretNamespace,
        Self::NodePublishSecretName,
        Self::NodePublishSecretNamespace,
        Self::ControllerExpandSecretName,
        Self::ControllerExpandSecretNamespace,
        Self::NodeExpandSecretName,
        Self::NodeExpandSecretNamespace,
    ];

    /// The storage-class parameter key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisionerSecretName => "csi.storage.k8s.io/provisioner-secret-name",
            Self::ProvisionerSecretNamespace => "csi.storage.k8s.io/provisioner-secret-namespace",
            Self::ControllerPublishSecretName => {
                "csi.storage.k8s.io/controller-publish-secret-name"
            }
            Self::ControllerPublishSecretNamespace => {
                "csi.storage.k8s.io/controller-publish-secret-namespace"
            }
            Self::NodeStageSecretName => "csi.storage.k8s.io/node-stage-secret-name",
            Self::NodeStageSecretNamespace => "csi.storage.k8s.io/node-stage-secret-namespace",
            Self::NodePublishSecretName => "csi.storage.k8s.io/node-publish-secret-name",
            Self::NodePublishSecretNamespace => "csi.storage.k8s.io/node-publish-secret-namespace",
            Self::ControllerExpandSecretName => "csi.storage.k8s.io/controller-expand-secret-name",
            Self::ControllerExpandSecretNamespace => {
                "csi.storage.k8s.io/controller-expand-secret-namespace"
            }
            Self::NodeExpandSecretName => "csi.storage.k8s.io/node-expand-secret-name",
            Self::NodeExpandSecretNamespace => "csi.storage.k8s.io/node-expand-secret-namespace",
        }
    }

    /// Whether this key names a secret (as opposed to its namespace)
    pub fn is_secret_name(&self) -> bool {
        is_secret_name_param(self.as_str())
    }
}

/// Whether a storage-class parameter key names a secret
pub fn is_secret_name_param(key: &str) -> bool {
    key.ends_with(SECRET_NAME_SUFFIX)
}

impl fmt::Display for CsiStorageClassAuthParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CsiStorageClassAuthParamKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown CSI auth parameter key '{s}'")))
    }
}
