//! csi-auth-e2e - end-to-end checks that a CSI driver enforces storage-class auth
//!
//! Storage classes can reference secrets for each CSI call the driver serves
//! (provision, controller publish, node stage, node publish, expand). This
//! crate provisions volumes through such storage classes on a live cluster and
//! checks that pods only start when the referenced secrets carry the right,
//! consistent credentials.
//!
//! # Modules
//!
//! - [`framework`] - driver contract, test patterns, cluster access, volume and pod helpers
//! - [`testsuites`] - the `auth` suite and its secret helpers
//! - [`drivers`] - drivers described by a YAML manifest
//! - [`config`] - suite configuration (file, environment, defaults)
//! - [`cli`] - the `csi-auth-e2e` command line
//! - [`telemetry`] - logging setup
//! - [`retry`] - retry with exponential backoff
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod cli;
pub mod config;
pub mod drivers;
pub mod error;
pub mod framework;
pub mod retry;
pub mod telemetry;
pub mod testsuites;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
