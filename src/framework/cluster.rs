//! Cluster access for the suites
//!
//! [`ClusterOps`] is the narrow set of API calls the suites make. Keeping it a
//! trait lets scenario logic be exercised against a mock in unit tests; the
//! real implementation is [`KubeCluster`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

/// Connection timeout for the API client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for the API client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// API calls the storage suites make against the cluster.
///
/// Missing objects surface as [`Error::NotFound`] from every method except
/// [`ClusterOps::get_secret`], which returns `Ok(None)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<Namespace>;
    /// Delete a namespace (does not wait for finalization)
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Fetch a secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    /// Create a secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;
    /// Replace an existing secret (optimistic concurrency via resourceVersion)
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;
    /// Delete a secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a storage class
    async fn create_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass>;
    /// Delete a storage class
    async fn delete_storage_class(&self, name: &str) -> Result<()>;

    /// Create a claim
    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;
    /// Fetch a claim
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;
    /// Delete a claim
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a persistent volume
    async fn get_pv(&self, name: &str) -> Result<PersistentVolume>;
    /// Delete a persistent volume
    async fn delete_pv(&self, name: &str) -> Result<()>;

    /// Create a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;
    /// Fetch a pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    /// Delete a pod (does not wait for termination)
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ClusterOps`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using an optional kubeconfig path and context.
    ///
    /// Without a path the kube default chain applies (`KUBECONFIG`,
    /// `~/.kube/config`, then in-cluster).
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        let options = KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };

        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::internal_with_context(
                        "connect",
                        format!("failed to read kubeconfig {}: {}", path.display(), e),
                    )
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| {
                        Error::internal_with_context(
                            "connect",
                            format!("failed to load kubeconfig: {}", e),
                        )
                    })?
            }
            None if context.is_some() => Config::from_kubeconfig(&options).await.map_err(|e| {
                Error::internal_with_context("connect", format!("failed to load kubeconfig: {}", e))
            })?,
            None => Config::infer().await.map_err(|e| {
                Error::internal_with_context("connect", format!("failed to infer config: {}", e))
            })?,
        };
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

        let client = Client::try_from(config).map_err(|e| {
            Error::internal_with_context("connect", format!("failed to create client: {}", e))
        })?;
        Ok(Self { client })
    }
}

/// Map a kube error to [`Error::NotFound`] on 404, [`Error::Kube`] otherwise
fn api_error(kind: &'static str, name: String) -> impl FnOnce(kube::Error) -> Error {
    move |e| match e {
        kube::Error::Api(ref ae) if ae.code == 404 => Error::not_found(kind, name),
        other => Error::from(other),
    }
}

fn qualified(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        debug!(namespace = %name, "Creating namespace");
        Ok(api.create(&PostParams::default(), &ns).await?)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(api_error("Namespace", name.to_string()))?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation("secret to replace has no name"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map_err(api_error("Secret", qualified(namespace, &name)))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("Secret", qualified(namespace, name)))?;
        Ok(())
    }

    async fn create_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), storage_class).await?)
    }

    async fn delete_storage_class(&self, name: &str) -> Result<()> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("StorageClass", name.to_string()))?;
        Ok(())
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pvc).await?)
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(api_error("PersistentVolumeClaim", qualified(namespace, name)))
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("PersistentVolumeClaim", qualified(namespace, name)))?;
        Ok(())
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(api_error("PersistentVolume", name.to_string()))
    }

    async fn delete_pv(&self, name: &str) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("PersistentVolume", name.to_string()))?;
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(api_error("Pod", qualified(namespace, name)))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("Pod", qualified(namespace, name)))?;
        Ok(())
    }
}
