//! Storage test framework
//!
//! The pieces every storage suite needs: the driver contract, test patterns,
//! cluster access, a per-test namespace, and helpers for volumes and pods.
//!
//! - [`driver`] - `TestDriver` and its capability traits
//! - [`pattern`] - volume types a suite can be run with
//! - [`suite`] - `TestSuite` trait, outcomes, and reports
//! - [`cluster`] - `ClusterOps` and its kube-rs implementation
//! - [`volume`] - storage class + claim provisioning for a test
//! - [`pod`] - client pods that mount test claims
//! - [`pv`] - claim and volume deletion helpers
//! - [`size`] - quantity parsing and size ranges

pub mod cluster;
pub mod driver;
pub mod pattern;
pub mod pod;
pub mod poll;
pub mod pv;
pub mod size;
pub mod suite;
pub mod volume;

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

pub use cluster::{ClusterOps, KubeCluster};
pub use driver::{
    AuthTestDriver, Capability, CsiStorageClassAuthParamKey, DriverCleanup, DriverInfo,
    DynamicPvTestDriver, NodeSelection, PerTestConfig, TestDriver,
};
pub use pattern::{TestPattern, TestVolType, VolumeMode, AUTH_DYNAMIC_PV};
pub use size::SizeRange;
pub use suite::{run_suite, SuiteReport, TestOutcome, TestResult, TestSuite, TestSuiteInfo};

use crate::config::DEFAULT_TEST_IMAGE;
use crate::Result;

/// Wait limits used by the framework helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Pod creation to Running
    pub pod_start_short: Duration,
    /// Pod deletion to gone
    pub pod_delete: Duration,
    /// Claim/volume deletion to gone
    pub claim_delete: Duration,
    /// Interval between polls
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pod_start_short: Duration::from_secs(60),
            pod_delete: Duration::from_secs(300),
            claim_delete: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Everything needed to stand up a [`Framework`] for one test
#[derive(Clone)]
pub struct FrameworkOptions {
    /// Namespace base name; a random suffix is appended per test
    pub base_name: String,
    /// Cluster access
    pub cluster: Arc<dyn ClusterOps>,
    /// Default timeouts
    pub timeouts: Timeouts,
    /// Image for client pods
    pub test_image: String,
    /// Skip namespace deletion on teardown
    pub keep_namespace: bool,
}

impl FrameworkOptions {
    /// Options with default timeouts and image
    pub fn new(base_name: impl Into<String>, cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            base_name: base_name.into(),
            cluster,
            timeouts: Timeouts::default(),
            test_image: DEFAULT_TEST_IMAGE.to_string(),
            keep_namespace: false,
        }
    }
}

/// Per-test environment: a fresh namespace plus cluster access and timeouts.
pub struct Framework {
    cluster: Arc<dyn ClusterOps>,
    namespace: String,
    timeouts: Timeouts,
    test_image: String,
    keep_namespace: bool,
}

impl Framework {
    /// Create a unique namespace `<base>-<suffix>` and return the framework for it
    pub async fn setup(options: &FrameworkOptions) -> Result<Self> {
        let namespace = format!("{}-{}", options.base_name, random_suffix(5));
        options.cluster.create_namespace(&namespace).await?;
        info!(namespace = %namespace, "Created test namespace");

        Ok(Self {
            cluster: options.cluster.clone(),
            namespace,
            timeouts: options.timeouts,
            test_image: options.test_image.clone(),
            keep_namespace: options.keep_namespace,
        })
    }

    /// Delete the test namespace unless asked to keep it
    pub async fn teardown(&self) -> Result<()> {
        if self.keep_namespace {
            warn!(namespace = %self.namespace, "Keeping test namespace");
            return Ok(());
        }
        match self.cluster.delete_namespace(&self.namespace).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Cluster access
    pub fn cluster(&self) -> &dyn ClusterOps {
        self.cluster.as_ref()
    }

    /// Test namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Effective timeouts
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Override timeouts for the rest of the test
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Image for client pods
    pub fn test_image(&self) -> &str {
        &self.test_image
    }
}

/// Lowercase alphanumeric suffix usable in object names
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}
