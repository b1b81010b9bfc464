//! Integration tests for secret handling
//!
//! These stories check the secret helpers against a real API server, where
//! `stringData` is merged into `data` on write.

use std::collections::BTreeMap;

use csi_auth_e2e::framework::Framework;
use csi_auth_e2e::testsuites::secrets::{create_or_update_secret, make_inconsistent_secret_data};

use super::helpers::{connect, options};

fn decoded(data: &BTreeMap<String, k8s_openapi::ByteString>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect()
}

/// Story: a driver's secret is rotated to new credentials
///
/// The suite writes the same secret several times while it runs (initial
/// credentials, inconsistent credentials, restored credentials). Each write
/// must leave exactly the latest payload behind.
///
/// Expected behavior:
/// - The first write creates the secret
/// - A later write replaces every value
/// - Keys missing from the later payload do not survive
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_rotated_secret_keeps_only_the_latest_payload() {
    let cluster = connect().await.expect("failed to connect");
    let options = options(cluster);
    let framework = Framework::setup(&options)
        .await
        .expect("failed to create namespace");
    let ns = framework.namespace().to_string();

    // Act: create with two keys
    let first = BTreeMap::from([
        ("username".to_string(), "alice".to_string()),
        ("token".to_string(), "t0k3n".to_string()),
    ]);
    create_or_update_secret(framework.cluster(), &ns, "auth-stage", &first)
        .await
        .expect("failed to create secret");

    // Act: rotate to one key with inconsistent values
    let rotated = make_inconsistent_secret_data(Some(&BTreeMap::from([(
        "username".to_string(),
        "alice".to_string(),
    )])))
    .unwrap();
    create_or_update_secret(framework.cluster(), &ns, "auth-stage", &rotated)
        .await
        .expect("failed to update secret");

    // Assert: only the rotated payload is stored
    let stored = framework
        .cluster()
        .get_secret(&ns, "auth-stage")
        .await
        .expect("failed to get secret")
        .expect("secret should exist");
    let data = decoded(&stored.data.unwrap_or_default());
    assert_eq!(data.len(), 1, "stale keys survived: {data:?}");
    assert_eq!(data["username"], "alice-inconsistent");

    // Cleanup
    framework.teardown().await.expect("failed to delete namespace");
}
