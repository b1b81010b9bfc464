//! Volume resources for a single test
//!
//! A [`VolumeResource`] is the storage class plus claim a test runs against.
//! Only dynamically provisioned volumes are supported.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

use super::driver::{Capability, PerTestConfig, TestDriver};
use super::pattern::{TestPattern, VolumeMode};
use super::pv::delete_claim_and_volume;
use super::size::{get_size_ranges_intersection, SizeRange};
use super::Framework;
use crate::{Error, Result};

/// What a claim should request
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSpec {
    /// Requested size as a quantity string
    pub claim_size: String,
    /// Storage class to provision from
    pub storage_class_name: String,
    /// Filesystem or block
    pub volume_mode: VolumeMode,
    /// Access modes; defaults to `ReadWriteOnce`
    pub access_modes: Vec<String>,
}

/// Build a claim with a generated name (`pvc-xxxxx`)
pub fn make_persistent_volume_claim(spec: &ClaimSpec, namespace: &str) -> PersistentVolumeClaim {
    let access_modes = if spec.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        spec.access_modes.clone()
    };

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            generate_name: Some("pvc-".to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(spec.claim_size.clone()),
                )])),
                ..Default::default()
            }),
            storage_class_name: Some(spec.storage_class_name.clone()),
            volume_mode: Some(spec.volume_mode.as_str().to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Storage class and claim created for one test
#[derive(Debug, Clone)]
pub struct VolumeResource {
    /// The created storage class
    pub sc: StorageClass,
    /// The created claim
    pub pvc: PersistentVolumeClaim,
}

/// Create the storage class and claim for `pattern`.
///
/// The claim size is the intersection of the suite's size range with the
/// driver's supported range.
pub async fn create_volume_resource(
    driver: &dyn TestDriver,
    config: &PerTestConfig,
    pattern: &TestPattern,
    test_volume_size_range: &SizeRange,
    framework: &Framework,
) -> Result<VolumeResource> {
    let info = driver.driver_info();

    if pattern.volume_mode == VolumeMode::Block && !info.has_capability(Capability::Block) {
        return Err(Error::driver(&info.name, "block volumes are not supported"));
    }

    let dynamic = driver
        .as_dynamic_pv()
        .ok_or_else(|| Error::driver(&info.name, "driver does not support dynamic provisioning"))?;

    let claim_size =
        get_size_ranges_intersection(test_volume_size_range, &info.supported_size_range)?;

    let mut sc = dynamic
        .dynamic_provisioner_storage_class(config, pattern.fs_type)
        .ok_or_else(|| {
            Error::driver(
                &info.name,
                format!("no storage class for fs type '{}'", pattern.fs_type),
            )
        })?;
    if sc.metadata.name.as_deref().map_or(true, str::is_empty) {
        sc.metadata.name = Some(format!("{}-sc", config.framework_namespace));
    }

    let cluster = framework.cluster();
    let sc = cluster.create_storage_class(&sc).await?;
    let sc_name = sc.metadata.name.clone().unwrap_or_default();
    info!(storage_class = %sc_name, driver = %info.name, "Created StorageClass");

    let claim = make_persistent_volume_claim(
        &ClaimSpec {
            claim_size,
            storage_class_name: sc_name.clone(),
            volume_mode: pattern.volume_mode,
            access_modes: Vec::new(),
        },
        framework.namespace(),
    );
    let pvc = match cluster.create_pvc(framework.namespace(), &claim).await {
        Ok(pvc) => pvc,
        Err(e) => {
            // Don't leak the class when the claim is rejected
            if let Err(rollback) = cluster.delete_storage_class(&sc_name).await {
                warn!(
                    storage_class = %sc_name,
                    error = %rollback,
                    "Failed to delete StorageClass after claim creation failed"
                );
            }
            return Err(e);
        }
    };
    info!(
        pvc = %pvc.metadata.name.as_deref().unwrap_or_default(),
        storage_class = %sc_name,
        "Created PersistentVolumeClaim"
    );

    Ok(VolumeResource { sc, pvc })
}

impl VolumeResource {
    /// Name of the storage class
    pub fn sc_name(&self) -> &str {
        self.sc.metadata.name.as_deref().unwrap_or_default()
    }

    /// Name of the claim
    pub fn pvc_name(&self) -> &str {
        self.pvc.metadata.name.as_deref().unwrap_or_default()
    }

    /// Delete the claim (and its volume), then the storage class.
    ///
    /// Both deletions are attempted; their errors are aggregated.
    pub async fn cleanup_resource(&self, framework: &Framework) -> Result<()> {
        let cluster = framework.cluster();
        let timeouts = framework.timeouts();
        let mut errors = Vec::new();

        if let Err(e) = delete_claim_and_volume(
            cluster,
            self.pvc_name(),
            framework.namespace(),
            timeouts.claim_delete,
            timeouts.poll_interval,
        )
        .await
        {
            errors.push(e);
        }

        match cluster.delete_storage_class(self.sc_name()).await {
            Err(e) if !e.is_not_found() => errors.push(e),
            _ => {}
        }

        match Error::aggregate("while cleaning up volume resource", errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
