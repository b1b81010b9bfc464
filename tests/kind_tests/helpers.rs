//! Shared helpers for live-cluster tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use csi_auth_e2e::drivers::ManifestDriver;
use csi_auth_e2e::framework::{FrameworkOptions, KubeCluster, Timeouts};

/// Env var naming the driver manifest under test
pub const DRIVER_ENV: &str = "CSI_AUTH_E2E_DRIVER";
/// Env var naming the kubeconfig context to use
pub const CONTEXT_ENV: &str = "CSI_AUTH_E2E_CONTEXT";

/// Connect to the test cluster
pub async fn connect() -> Result<KubeCluster, String> {
    // Install default crypto provider (required for rustls)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let context = std::env::var(CONTEXT_ENV).ok();
    KubeCluster::connect(None, context.as_deref())
        .await
        .map_err(|e| format!("failed to connect to cluster: {e}"))
}

/// Load the driver under test, `None` when no manifest is configured
pub fn load_driver() -> Option<ManifestDriver> {
    let path = PathBuf::from(std::env::var(DRIVER_ENV).ok()?);
    Some(
        ManifestDriver::from_file(&path)
            .unwrap_or_else(|e| panic!("failed to load driver manifest {}: {e}", path.display())),
    )
}

/// Framework options for live runs, with a shorter pod delete wait than the defaults
pub fn options(cluster: KubeCluster) -> FrameworkOptions {
    let mut options = FrameworkOptions::new("auth-it", Arc::new(cluster));
    options.timeouts = Timeouts {
        pod_start_short: Duration::from_secs(60),
        pod_delete: Duration::from_secs(120),
        claim_delete: Duration::from_secs(300),
        poll_interval: Duration::from_secs(2),
    };
    options
}
