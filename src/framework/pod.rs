//! Client pods that mount test claims

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext,
    PodSpec, SELinuxOptions, SecurityContext, Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use super::cluster::ClusterOps;
use super::driver::NodeSelection;
use super::poll::poll_until;
use crate::{Error, Result};

/// SELinux level applied to test pods
pub const DEFAULT_SELINUX_LEVEL: &str = "s0:c0,c1";

const POD_COMMAND: &str = "trap exit TERM; while true; do sleep 1; done";

/// What a client pod should look like
#[derive(Debug, Clone, Default)]
pub struct PodConfig {
    /// Namespace to create the pod in
    pub namespace: String,
    /// Claims to mount, in order (`/mnt/volume1`, `/mnt/volume2`, ...)
    pub pvcs: Vec<PersistentVolumeClaim>,
    /// SELinux level for the pod security context
    pub se_linux_label: Option<String>,
    /// Scheduling constraints
    pub node_selection: NodeSelection,
    /// Container image
    pub image: String,
}

/// A pod that did not reach Running.
///
/// `pod` is set when the object was created, so the caller can still delete it.
#[derive(Debug)]
pub struct PodStartFailure {
    /// The created pod, if creation got that far
    pub pod: Option<Pod>,
    /// Why the pod is not running
    pub error: Error,
}

/// Build the pod object for `config`
pub fn make_sec_pod(config: &PodConfig) -> Result<Pod> {
    let mut volumes = Vec::with_capacity(config.pvcs.len());
    let mut mounts = Vec::new();
    let mut devices = Vec::new();

    for (index, pvc) in config.pvcs.iter().enumerate() {
        let claim_name = pvc
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation("claim mounted by test pod has no name"))?;
        let volume_name = format!("volume{}", index + 1);
        let path = format!("/mnt/volume{}", index + 1);

        let is_block = pvc
            .spec
            .as_ref()
            .and_then(|s| s.volume_mode.as_deref())
            .is_some_and(|m| m == "Block");
        if is_block {
            devices.push(VolumeDevice {
                name: volume_name.clone(),
                device_path: path,
            });
        } else {
            mounts.push(VolumeMount {
                name: volume_name.clone(),
                mount_path: path,
                ..Default::default()
            });
        }

        volumes.push(Volume {
            name: volume_name,
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name,
                read_only: Some(false),
            }),
            ..Default::default()
        });
    }

    let container = Container {
        name: "write-pod".to_string(),
        image: Some(config.image.clone()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            POD_COMMAND.to_string(),
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            ..Default::default()
        }),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        volume_devices: (!devices.is_empty()).then_some(devices),
        ..Default::default()
    };

    let node_selector: Option<BTreeMap<String, String>> = (!config
        .node_selection
        .selector
        .is_empty())
    .then(|| config.node_selection.selector.clone());

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(format!("pod-{}", uuid::Uuid::new_v4())),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: (!volumes.is_empty()).then_some(volumes),
            restart_policy: Some("OnFailure".to_string()),
            termination_grace_period_seconds: Some(1),
            node_name: config.node_selection.name.clone(),
            node_selector,
            security_context: config.se_linux_label.as_ref().map(|level| PodSecurityContext {
                se_linux_options: Some(SELinuxOptions {
                    level: Some(level.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    })
}

/// Create a pod for `config` and wait up to `timeout` for it to be Running.
pub async fn create_sec_pod(
    cluster: &dyn ClusterOps,
    config: &PodConfig,
    timeout: Duration,
    poll_interval: Duration,
) -> std::result::Result<Pod, PodStartFailure> {
    let pod = make_sec_pod(config).map_err(|error| PodStartFailure { pod: None, error })?;

    let created = cluster
        .create_pod(&config.namespace, &pod)
        .await
        .map_err(|error| PodStartFailure { pod: None, error })?;
    let name = created.metadata.name.clone().unwrap_or_default();
    info!(pod = %name, namespace = %config.namespace, "Created test pod");

    match wait_for_pod_running(cluster, &config.namespace, &name, timeout, poll_interval).await {
        Ok(running) => Ok(running),
        Err(error) => Err(PodStartFailure {
            pod: Some(created),
            error,
        }),
    }
}

/// Wait for a pod to reach the Running phase.
///
/// A pod that ends up Failed or Succeeded fails the wait immediately.
pub async fn wait_for_pod_running(
    cluster: &dyn ClusterOps,
    namespace: &str,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Pod> {
    poll_until(
        "wait_for_pod_running",
        timeout,
        poll_interval,
        format!("pod {namespace}/{name} did not reach Running within {timeout:?}"),
        move || async move {
            let pod = cluster.get_pod(namespace, name).await?;
            let phase = pod_phase(&pod);
            debug!(pod = %name, phase = %phase, "Checked pod phase");
            match phase {
                "Running" => Ok(true),
                "Failed" | "Succeeded" => Err(Error::assertion(format!(
                    "pod {namespace}/{name} terminated with phase {phase}"
                ))),
                _ => Ok(false),
            }
        },
    )
    .await?;

    cluster.get_pod(namespace, name).await
}

/// Delete a pod and wait until the API server no longer has it.
///
/// A pod that is already gone counts as deleted.
pub async fn delete_pod_with_wait(
    cluster: &dyn ClusterOps,
    pod: &Pod,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let (Some(name), Some(namespace)) =
        (pod.metadata.name.as_deref(), pod.metadata.namespace.as_deref())
    else {
        return Err(Error::validation("pod to delete has no name or namespace"));
    };

    info!(pod = %name, namespace = %namespace, "Deleting pod");
    match cluster.delete_pod(namespace, name).await {
        Err(e) if e.is_not_found() => return Ok(()),
        other => other?,
    }

    poll_until(
        "delete_pod_with_wait",
        timeout,
        poll_interval,
        format!("pod {namespace}/{name} was not deleted within {timeout:?}"),
        move || async move {
            match cluster.get_pod(namespace, name).await {
                Ok(_) => Ok(false),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        },
    )
    .await
}

/// Pod phase, `Unknown` when the status is missing
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}
