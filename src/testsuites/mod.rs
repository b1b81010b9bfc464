//! Storage test suites
//!
//! - [`auth`] - CSI storage-class secret enforcement
//! - [`secrets`] - secret and storage-class helpers used by the suites

pub mod auth;
pub mod secrets;

pub use auth::{init_auth_test_suite, init_custom_auth_test_suite, AuthScenario, AuthTestSuite};
