//! Test drivers shipped with the suite

pub mod manifest;

pub use manifest::{DriverManifest, ManifestDriver};
