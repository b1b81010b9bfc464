//! Integration tests for the auth suite
//!
//! These tests run the real scenarios against the driver named by
//! `CSI_AUTH_E2E_DRIVER`. Without that variable they return early.

use csi_auth_e2e::framework::{run_suite, TestDriver, TestOutcome, TestSuite};
use csi_auth_e2e::testsuites::{init_auth_test_suite, AuthScenario};

use super::helpers::{connect, load_driver, options, DRIVER_ENV};

/// Story: a storage vendor validates a driver that enforces auth
///
/// The vendor points the suite at their driver manifest. Every scenario
/// should pass, except the two-secret scenario which is skipped when the
/// manifest carries a single payload.
///
/// Expected behavior:
/// - The suite is not skipped for an auth-capable driver
/// - No scenario fails
/// - Every scenario is reported exactly once
#[tokio::test]
#[ignore = "requires a cluster with a CSI driver - run with: cargo test --test kind -- --ignored"]
async fn story_vendor_validates_driver_with_auth() {
    let Some(driver) = load_driver() else {
        println!("{DRIVER_ENV} not set, skipping");
        return;
    };
    let cluster = connect().await.expect("failed to connect");
    let suite = init_auth_test_suite();

    // Act: run every scenario
    let report = run_suite(&suite, &driver, &options(cluster), None).await;

    // Assert: one result per scenario, none failed
    assert_eq!(report.results.len(), AuthScenario::ALL.len());
    for result in &report.results {
        assert!(
            !result.outcome.is_failure(),
            "{} failed: {}",
            result.name,
            result.outcome
        );
    }
    assert_eq!(report.driver, driver.driver_info().name);
}

/// Story: a vendor debugs a single scenario
///
/// While fixing a bug in how the driver reads node-stage secrets, the vendor
/// runs only the basic binding scenario.
///
/// Expected behavior:
/// - Only the focused scenario runs
/// - It passes (or is skipped when the driver does not support auth)
#[tokio::test]
#[ignore = "requires a cluster with a CSI driver - run with: cargo test --test kind -- --ignored"]
async fn story_vendor_focuses_on_basic_binding() {
    let Some(driver) = load_driver() else {
        println!("{DRIVER_ENV} not set, skipping");
        return;
    };
    let cluster = connect().await.expect("failed to connect");
    let suite = init_auth_test_suite();
    let scenario = AuthScenario::BindWithCurrentSecret;

    let report = run_suite(&suite, &driver, &options(cluster), Some(scenario.name())).await;

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.name, scenario.name());
    match &result.outcome {
        TestOutcome::Passed => {}
        TestOutcome::Skipped(reason) => {
            assert!(
                suite
                    .skip_unsupported_tests(&driver, &suite.info().test_patterns[0])
                    .is_some(),
                "unexpected skip: {reason}"
            );
        }
        TestOutcome::Failed(reason) => panic!("basic binding failed: {reason}"),
    }
}
