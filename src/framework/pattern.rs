//! Test patterns: which kind of volume a suite is exercised with

use std::fmt;

use serde::Serialize;

/// How the volume under test is provided to the pod.
///
/// Only dynamic provisioning is exercised; the type still names the volume
/// source in skip messages and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestVolType {
    /// PV created by the provisioner from a storage class
    DynamicPv,
}

impl fmt::Display for TestVolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestVolType::DynamicPv => f.write_str("DynamicPV"),
        }
    }
}

/// Filesystem or raw block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VolumeMode {
    /// Mounted filesystem
    #[default]
    Filesystem,
    /// Raw block device
    Block,
}

impl VolumeMode {
    /// Value for `PersistentVolumeClaimSpec.volumeMode`
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::Filesystem => "Filesystem",
            VolumeMode::Block => "Block",
        }
    }
}

/// One way of running a suite against a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestPattern {
    /// Human-readable pattern name
    pub name: &'static str,
    /// Volume source type
    pub vol_type: TestVolType,
    /// Filesystem type; empty means the driver default
    pub fs_type: &'static str,
    /// Filesystem or block
    pub volume_mode: VolumeMode,
}

/// Dynamic provisioning with a storage class that carries CSI secrets
pub const AUTH_DYNAMIC_PV: TestPattern = TestPattern {
    name: "Dynamic PV (auth)",
    vol_type: TestVolType::DynamicPv,
    fs_type: "",
    volume_mode: VolumeMode::Filesystem,
};

impl fmt::Display for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
