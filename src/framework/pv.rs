//! Claim and volume cleanup helpers
//!
//! All deletions here treat "already gone" as success.

use std::time::Duration;

use tracing::info;

use super::cluster::ClusterOps;
use super::poll::poll_until;
use crate::Result;

/// Delete a claim, tolerating one that does not exist
pub async fn delete_persistent_volume_claim(
    cluster: &dyn ClusterOps,
    name: &str,
    namespace: &str,
) -> Result<()> {
    info!(pvc = %name, namespace = %namespace, "Deleting PersistentVolumeClaim");
    match cluster.delete_pvc(namespace, name).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Delete a volume, tolerating one that does not exist
pub async fn delete_persistent_volume(cluster: &dyn ClusterOps, name: &str) -> Result<()> {
    info!(pv = %name, "Deleting PersistentVolume");
    match cluster.delete_pv(name).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Name of the volume bound to a claim, `None` if unbound or the claim is gone
pub async fn bound_volume_name(
    cluster: &dyn ClusterOps,
    name: &str,
    namespace: &str,
) -> Result<Option<String>> {
    match cluster.get_pvc(namespace, name).await {
        Ok(pvc) => Ok(pvc
            .spec
            .and_then(|s| s.volume_name)
            .filter(|v| !v.is_empty())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Wait until a volume no longer exists
pub async fn wait_for_persistent_volume_deleted(
    cluster: &dyn ClusterOps,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    poll_until(
        "wait_for_persistent_volume_deleted",
        timeout,
        poll_interval,
        format!("PersistentVolume {name} still exists after {timeout:?}"),
        move || async move {
            match cluster.get_pv(name).await {
                Ok(_) => Ok(false),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        },
    )
    .await
}

/// Delete a claim together with the volume it was bound to.
///
/// The provisioner gets `timeout` to reclaim the volume; a volume that is
/// still around afterwards is deleted directly.
pub async fn delete_claim_and_volume(
    cluster: &dyn ClusterOps,
    name: &str,
    namespace: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let volume = bound_volume_name(cluster, name, namespace).await?;
    delete_persistent_volume_claim(cluster, name, namespace).await?;

    let Some(volume) = volume else {
        return Ok(());
    };
    match wait_for_persistent_volume_deleted(cluster, &volume, timeout, poll_interval).await {
        Ok(()) => Ok(()),
        Err(e) if matches!(e, crate::Error::Timeout { .. }) => {
            delete_persistent_volume(cluster, &volume).await
        }
        Err(e) => Err(e),
    }
}
