//! Suite configuration
//!
//! Resolution order (highest priority first):
//! 1. CLI flags (applied by the caller)
//! 2. `CSI_AUTH_E2E_*` environment variables
//! 3. The config file (`--config`, YAML or JSON)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::framework::Timeouts;
use crate::{Error, Result};

/// Image used for the pods that consume test volumes
pub const DEFAULT_TEST_IMAGE: &str = "registry.k8s.io/e2e-test-images/busybox:1.29-4";

/// Base name for per-suite test namespaces
pub const DEFAULT_NAMESPACE_BASE: &str = "auth";

const ENV_PREFIX: &str = "CSI_AUTH_E2E_";

/// Top-level suite configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SuiteConfig {
    /// Kubeconfig path; falls back to the kube default chain when unset
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context
    pub context: Option<String>,
    /// Base name for the generated test namespace
    pub namespace_base: String,
    /// Keep the test namespace after the run (for debugging)
    pub keep_namespace: bool,
    /// Image for test pods
    pub test_image: String,
    /// Timeouts, in seconds
    pub timeouts: TimeoutConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            namespace_base: DEFAULT_NAMESPACE_BASE.to_string(),
            keep_namespace: false,
            test_image: DEFAULT_TEST_IMAGE.to_string(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Timeout settings as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    /// How long a pod may take to reach Running
    pub pod_start_secs: u64,
    /// How long a pod may take to disappear after deletion
    pub pod_delete_secs: u64,
    /// How long a claim or volume may take to be deleted
    pub claim_delete_secs: u64,
    /// Polling interval for all waits
    pub poll_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pod_start_secs: 60,
            pod_delete_secs: 300,
            claim_delete_secs: 300,
            poll_interval_secs: 2,
        }
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(cfg: &TimeoutConfig) -> Self {
        Timeouts {
            pod_start_short: Duration::from_secs(cfg.pod_start_secs),
            pod_delete: Duration::from_secs(cfg.pod_delete_secs),
            claim_delete: Duration::from_secs(cfg.claim_delete_secs),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
        }
    }
}

impl SuiteConfig {
    /// Load configuration from a YAML or JSON file.
    ///
    /// YAML is a superset of JSON, so both go through `serde_yaml`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: SuiteConfig = serde_yaml::from_str(&data).map_err(|e| {
            Error::serialization(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CSI_AUTH_E2E_*` overrides using the given lookup.
    ///
    /// Takes a lookup function so tests don't have to mutate process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("KUBECONFIG") {
            self.kubeconfig = Some(PathBuf::from(v));
        }
        if let Some(v) = var("CONTEXT") {
            self.context = Some(v);
        }
        if let Some(v) = var("NAMESPACE_BASE") {
            self.namespace_base = v;
        }
        if let Some(v) = var("TEST_IMAGE") {
            self.test_image = v;
        }
        if let Some(v) = var("KEEP_NAMESPACE") {
            self.keep_namespace = parse_bool(&v).ok_or_else(|| {
                Error::validation_for_field("keepNamespace", format!("not a boolean: {v}"))
            })?;
        }
        if let Some(v) = var("POD_START_SECS") {
            self.timeouts.pod_start_secs = parse_secs("timeouts.podStartSecs", &v)?;
        }
        if let Some(v) = var("POD_DELETE_SECS") {
            self.timeouts.pod_delete_secs = parse_secs("timeouts.podDeleteSecs", &v)?;
        }
        if let Some(v) = var("CLAIM_DELETE_SECS") {
            self.timeouts.claim_delete_secs = parse_secs("timeouts.claimDeleteSecs", &v)?;
        }
        if let Some(v) = var("POLL_INTERVAL_SECS") {
            self.timeouts.poll_interval_secs = parse_secs("timeouts.pollIntervalSecs", &v)?;
        }

        debug!(config = ?self, "Applied environment overrides");
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.namespace_base.is_empty() {
            return Err(Error::validation_for_field(
                "namespaceBase",
                "namespace base name must not be empty",
            ));
        }
        if !is_dns_label(&self.namespace_base) {
            return Err(Error::validation_for_field(
                "namespaceBase",
                format!("'{}' is not a valid DNS label", self.namespace_base),
            ));
        }
        if self.test_image.is_empty() {
            return Err(Error::validation_for_field("testImage", "test image must not be empty"));
        }
        if self.timeouts.pod_start_secs == 0 {
            return Err(Error::validation_for_field(
                "timeouts.podStartSecs",
                "pod start timeout must be positive",
            ));
        }
        Ok(())
    }

    /// Timeouts in the form the framework consumes
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from(&self.timeouts)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_secs(field: &str, v: &str) -> Result<u64> {
    v.parse::<u64>()
        .map_err(|_| Error::validation_for_field(field, format!("not a number of seconds: {v}")))
}

/// RFC 1123 label, leaving room for the random suffix the framework appends
fn is_dns_label(s: &str) -> bool {
    s.len() <= 50
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}
