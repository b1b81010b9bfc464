//! Integration tests for the CSI auth suite
//!
//! These tests run against a live cluster and tell the story of how a storage
//! vendor uses the suite to validate a driver's secret handling.
//!
//! # Test Organization
//!
//! - `secret_handling`: Stories about the secret helpers the suite relies on,
//!   run directly against the API server (no driver needed beyond the manifest)
//!
//! - `auth_suite`: Stories that run the auth scenarios end to end against the
//!   driver named by `CSI_AUTH_E2E_DRIVER`
//!
//! # Running These Tests
//!
//! ```bash
//! # All stories
//! CSI_AUTH_E2E_DRIVER=hack/hostpath.yaml cargo test --test kind -- --ignored
//!
//! # Only the full suite run
//! CSI_AUTH_E2E_DRIVER=hack/hostpath.yaml cargo test --test kind auth_suite -- --ignored --nocapture
//! ```

mod auth_suite;
mod helpers;
mod secret_handling;
