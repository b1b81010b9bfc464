//! Secret and storage-class helpers for the auth suite

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use crate::framework::ClusterOps;
use crate::retry::{retry_if, RetryConfig};
use crate::{Error, Result};

/// Appended to every value by [`make_inconsistent_secret_data`]
pub const INCONSISTENT_SUFFIX: &str = "-inconsistent";

/// Create the secret, or replace the payload of an existing one with `data`.
///
/// The payload is written as `stringData`; stale `data` on an existing
/// secret is dropped so no old key survives the update. Update conflicts are
/// retried.
pub async fn create_or_update_secret(
    cluster: &dyn ClusterOps,
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, String>,
) -> Result<Secret> {
    let mut secret = make_secret(namespace, name);
    secret.string_data = Some(data.clone());
    let secret = &secret;

    retry_if(
        &RetryConfig::default(),
        "create_or_update_secret",
        Error::is_conflict,
        move || async move {
            match cluster.get_secret(namespace, name).await? {
                Some(mut existing) => {
                    info!(secret = %name, namespace = %namespace, "Updating secret");
                    existing.data = None;
                    existing.string_data = Some(data.clone());
                    cluster.replace_secret(namespace, &existing).await
                }
                None => {
                    info!(secret = %name, namespace = %namespace, "Creating secret");
                    cluster.create_secret(namespace, secret).await
                }
            }
        },
    )
    .await
}

/// A secret carrying only its name and namespace
pub fn make_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Same keys, every value suffixed so it no longer matches the input
pub fn make_inconsistent_secret_data(
    data: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    data.map(|d| {
        d.iter()
            .map(|(k, v)| (k.clone(), format!("{v}{INCONSISTENT_SUFFIX}")))
            .collect()
    })
}

/// Remove every key of `auth_params` from the storage class parameters
pub fn clean_storage_class_auth_params(
    sc: &mut StorageClass,
    auth_params: Option<&BTreeMap<String, String>>,
) {
    let (Some(auth_params), Some(parameters)) = (auth_params, sc.parameters.as_mut()) else {
        return;
    };
    for key in auth_params.keys() {
        parameters.remove(key);
    }
}
