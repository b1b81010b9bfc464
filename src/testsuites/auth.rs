//! Auth test suite
//!
//! Checks that a CSI driver honours the secrets referenced from its storage
//! class. Every scenario gets its own namespace, storage class and claim;
//! everything a scenario creates is tracked on [`AuthTestContext`] and torn
//! down in reverse order once the scenario body returns, pass or fail.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use tracing::{debug, info, warn};

use super::secrets::{
    clean_storage_class_auth_params, create_or_update_secret, make_inconsistent_secret_data,
};
use crate::framework::driver::is_secret_name_param;
use crate::framework::pod::{
    create_sec_pod, delete_pod_with_wait, PodConfig, PodStartFailure, DEFAULT_SELINUX_LEVEL,
};
use crate::framework::pv::delete_claim_and_volume;
use crate::framework::volume::{create_volume_resource, VolumeResource};
use crate::framework::{
    CsiStorageClassAuthParamKey, DriverCleanup, Framework, FrameworkOptions, PerTestConfig,
    SizeRange, TestDriver, TestOutcome, TestPattern, TestResult, TestSuite, TestSuiteInfo,
    AUTH_DYNAMIC_PV,
};
use crate::{Error, Result};

/// Suffix of the storage class and claim that carry no auth parameters
pub const WITHOUT_AUTH_SUFFIX: &str = "-without-auth";
/// Suffix of the second secret set and the objects that use it
pub const SECRET_B_SUFFIX: &str = "-secret-b";

const CLEANUP_CONTEXT: &str = "while cleaning up resource";

/// The scenarios of the auth suite, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScenario {
    /// A pod binds a claim provisioned with the driver's first secret payload
    BindWithCurrentSecret,
    /// A pod must not start while one stage of a match group sees other credentials
    InconsistentMatchGroup,
    /// Auth and no-auth storage classes are usable side by side
    AuthAndNoAuthClasses,
    /// Two auth storage classes with different secret payloads are usable side by side
    TwoAuthClasses,
}

impl AuthScenario {
    /// Every scenario, in run order
    pub const ALL: [AuthScenario; 4] = [
        Self::BindWithCurrentSecret,
        Self::InconsistentMatchGroup,
        Self::AuthAndNoAuthClasses,
        Self::TwoAuthClasses,
    ];

    /// Test name as reported
    pub fn name(&self) -> &'static str {
        match self {
            Self::BindWithCurrentSecret => {
                "pod should binding pvc success using current auth secret data"
            }
            Self::InconsistentMatchGroup => {
                "pod should binding pvc fail when the secret data in a match group is inconsistent"
            }
            Self::AuthAndNoAuthClasses => {
                "The no-auth-storageclass and the auth-storageclass can exist at the same time and be correctly used in different pods"
            }
            Self::TwoAuthClasses => {
                "Two auth-storageclass with different secret data can exist at the same time and be correctly used in different pods"
            }
        }
    }

    /// Reason this scenario cannot run against `driver`, checked before any setup
    fn skip_reason(&self, driver: &dyn TestDriver) -> Option<String> {
        match self {
            Self::TwoAuthClasses => driver
                .as_auth()
                .filter(|auth| auth.auth_secret_data().len() < 2)
                .map(|_| {
                    "auth secret data has fewer than 2 entries, skipping multiple auth-storageclass test"
                        .to_string()
                }),
            _ => None,
        }
    }
}

/// The `auth` storage test suite
pub struct AuthTestSuite {
    info: TestSuiteInfo,
}

/// Auth suite with the given patterns
pub fn init_custom_auth_test_suite(patterns: Vec<TestPattern>) -> AuthTestSuite {
    AuthTestSuite {
        info: TestSuiteInfo {
            name: "auth".to_string(),
            test_patterns: patterns,
            supported_size_range: SizeRange::default(),
        },
    }
}

/// Auth suite with its default pattern
pub fn init_auth_test_suite() -> AuthTestSuite {
    init_custom_auth_test_suite(vec![AUTH_DYNAMIC_PV])
}

#[async_trait]
impl TestSuite for AuthTestSuite {
    fn info(&self) -> &TestSuiteInfo {
        &self.info
    }

    fn test_names(&self) -> Vec<&'static str> {
        AuthScenario::ALL.iter().map(AuthScenario::name).collect()
    }

    fn skip_unsupported_tests(
        &self,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
    ) -> Option<String> {
        let name = &driver.driver_info().name;
        if driver.as_dynamic_pv().is_none() {
            return Some(format!(
                "Driver {name} doesn't support {} -- skipping",
                pattern.vol_type
            ));
        }
        if driver.as_auth().is_none() {
            return Some(format!("Driver {name} does not support auth -- skipping"));
        }
        None
    }

    async fn define_tests(
        &self,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
        options: &FrameworkOptions,
        focus: Option<&str>,
    ) -> Vec<TestResult> {
        let mut results = Vec::new();
        for scenario in AuthScenario::ALL {
            if !focus.map_or(true, |f| scenario.name().contains(f)) {
                debug!(test = %scenario.name(), "Filtered out by focus");
                continue;
            }
            results.push(self.run_scenario(scenario, driver, pattern, options).await);
        }
        results
    }
}

impl AuthTestSuite {
    async fn run_scenario(
        &self,
        scenario: AuthScenario,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
        options: &FrameworkOptions,
    ) -> TestResult {
        let started = Instant::now();
        let name = scenario.name();

        if let Some(reason) = scenario.skip_reason(driver) {
            info!(test = %name, reason = %reason, "Skipping test");
            return TestResult::new(name, pattern, TestOutcome::Skipped(reason), started);
        }

        info!(test = %name, pattern = %pattern, "Starting test");
        let mut framework = match Framework::setup(options).await {
            Ok(framework) => framework,
            Err(e) => {
                let outcome = TestOutcome::Failed(format!("failed to set up test namespace: {e}"));
                return TestResult::new(name, pattern, outcome, started);
            }
        };
        if let Some(mut timeouts) = driver.timeouts() {
            timeouts.pod_start_short = options.timeouts.pod_start_short;
            framework.set_timeouts(timeouts);
        }

        let mut ctx = AuthTestContext::new(framework, &driver.driver_info().name);
        let body = ctx
            .run(scenario, driver, pattern, &self.info.supported_size_range)
            .await;
        let cleanup = ctx.cleanup().await;
        if let Err(e) = ctx.framework.teardown().await {
            warn!(
                namespace = %ctx.framework.namespace(),
                error = %e,
                "Failed to delete test namespace"
            );
        }

        TestResult::new(name, pattern, combine_outcome(body, cleanup), started)
    }
}

/// Fold the body and cleanup results into one outcome; the body's failure
/// comes first and a cleanup failure is appended to it.
pub fn combine_outcome(body: Result<()>, cleanup: Result<()>) -> TestOutcome {
    match (body, cleanup) {
        (Ok(()), Ok(())) => TestOutcome::Passed,
        (Err(e), Ok(())) | (Ok(()), Err(e)) => TestOutcome::Failed(e.to_string()),
        (Err(body), Err(cleanup)) => TestOutcome::Failed(format!("{body}; {cleanup}")),
    }
}

/// State of one running scenario plus everything it created
struct AuthTestContext {
    framework: Framework,
    driver_name: String,
    config: PerTestConfig,
    driver_cleanup: Option<DriverCleanup>,
    resource: Option<VolumeResource>,
    pod_config: PodConfig,

    sc_auth_params: BTreeMap<String, String>,
    auth_secret_data: Vec<BTreeMap<String, String>>,
    auth_match_group: Vec<Vec<CsiStorageClassAuthParamKey>>,

    // Created objects; secrets are deleted last
    secret_names: Vec<String>,
    pods: Vec<Pod>,
    claims: Vec<String>,
    storage_classes: Vec<String>,
}

impl AuthTestContext {
    fn new(framework: Framework, driver_name: &str) -> Self {
        Self {
            framework,
            driver_name: driver_name.to_string(),
            config: PerTestConfig::default(),
            driver_cleanup: None,
            resource: None,
            pod_config: PodConfig::default(),
            sc_auth_params: BTreeMap::new(),
            auth_secret_data: Vec::new(),
            auth_match_group: Vec::new(),
            secret_names: Vec::new(),
            pods: Vec::new(),
            claims: Vec::new(),
            storage_classes: Vec::new(),
        }
    }

    async fn run(
        &mut self,
        scenario: AuthScenario,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
        size_range: &SizeRange,
    ) -> Result<()> {
        self.init(driver, pattern, size_range).await?;
        match scenario {
            AuthScenario::BindWithCurrentSecret => self.bind_with_current_secret().await,
            AuthScenario::InconsistentMatchGroup => self.inconsistent_match_group().await,
            AuthScenario::AuthAndNoAuthClasses => self.auth_and_no_auth_classes().await,
            AuthScenario::TwoAuthClasses => self.two_auth_classes().await,
        }
    }

    async fn init(
        &mut self,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
        size_range: &SizeRange,
    ) -> Result<()> {
        let auth = driver
            .as_auth()
            .ok_or_else(|| Error::assertion("Driver not yet implement interface: AuthTestDriver"))?;

        self.auth_secret_data = auth.auth_secret_data();
        let Some(first) = self.auth_secret_data.first().cloned() else {
            return Err(Error::assertion(
                "GetAuthSecretData() must return at least one map in AuthDynamicPV test pattern",
            ));
        };
        self.auth_match_group = auth.auth_match_group().unwrap_or_default();

        let (config, cleanup) = driver.prepare_test(&self.framework).await?;
        self.config = config;
        self.driver_cleanup = cleanup;
        self.sc_auth_params = auth.storage_class_auth_parameters(&self.config);

        // The provisioner needs its secret before the claim is created
        let provisioner_key = CsiStorageClassAuthParamKey::ProvisionerSecretName.as_str();
        if let Some(name) = self.sc_auth_params.get(provisioner_key).cloned() {
            self.write_secret(&name, &first).await.map_err(|e| {
                Error::assertion(format!("Failed to create provisioner secret: {e}"))
            })?;
        }

        let resource =
            create_volume_resource(driver, &self.config, pattern, size_range, &self.framework)
                .await?;
        self.pod_config = PodConfig {
            namespace: self.framework.namespace().to_string(),
            pvcs: vec![resource.pvc.clone()],
            se_linux_label: Some(DEFAULT_SELINUX_LEVEL.to_string()),
            node_selection: self.config.client_node_selection.clone(),
            image: self.framework.test_image().to_string(),
        };
        self.resource = Some(resource);

        let names: Vec<String> = self
            .sc_auth_params
            .iter()
            .filter(|(key, _)| is_secret_name_param(key))
            .map(|(_, value)| value.clone())
            .collect();
        for name in names {
            self.write_secret(&name, &first).await?;
        }
        Ok(())
    }

    async fn bind_with_current_secret(&mut self) -> Result<()> {
        let config = self.pod_config.clone();
        let pod = self.start_pod(&config).await?;
        self.delete_pod(&pod).await
    }

    async fn inconsistent_match_group(&mut self) -> Result<()> {
        let groups: Vec<_> = self
            .auth_match_group
            .iter()
            .filter(|group| group.len() > 1)
            .cloned()
            .collect();
        if groups.is_empty() {
            info!(driver = %self.driver_name, "Driver has no match group with more than one stage");
            return Ok(());
        }

        let consistent = self.auth_secret_data.first().cloned().unwrap_or_default();
        let inconsistent = make_inconsistent_secret_data(Some(&consistent)).unwrap_or_default();
        let config = self.pod_config.clone();

        for group in groups {
            let stage = group[rand::thread_rng().gen_range(0..group.len())];
            let secret_name = self.sc_auth_params.get(stage.as_str()).cloned().ok_or_else(|| {
                Error::driver(
                    &self.driver_name,
                    format!("match group stage {stage} has no storage class parameter"),
                )
            })?;

            info!(
                stage = %stage,
                secret = %secret_name,
                "Making secret inconsistent with its match group"
            );
            self.write_secret(&secret_name, &inconsistent).await?;

            match self.start_pod(&config).await {
                Ok(pod) => {
                    return Err(Error::assertion(format!(
                        "pod {} reached Running although secret {secret_name} for {stage} is inconsistent with its match group",
                        pod.metadata.name.as_deref().unwrap_or_default()
                    )));
                }
                Err(e) => info!(stage = %stage, error = %e, "Pod did not start, as expected"),
            }

            // Later groups must start from consistent credentials
            self.delete_tracked_pods().await?;
            self.write_secret(&secret_name, &consistent).await?;
        }
        Ok(())
    }

    async fn auth_and_no_auth_classes(&mut self) -> Result<()> {
        let (sc, pvc, sc_name, pvc_name) = self.resource_objects()?;

        info!("Creating a pod using the auth claim");
        let config = self.pod_config.clone();
        self.start_pod(&config).await?;

        info!("Creating a storage class without auth");
        let mut sc_without_auth =
            clone_storage_class(&sc, format!("{sc_name}{WITHOUT_AUTH_SUFFIX}"));
        clean_storage_class_auth_params(&mut sc_without_auth, Some(&self.sc_auth_params));
        let sc_without_auth = self.create_storage_class(&sc_without_auth).await?;

        info!("Creating a claim without auth");
        let pvc_without_auth = clone_claim(
            &pvc,
            format!("{pvc_name}{WITHOUT_AUTH_SUFFIX}"),
            self.framework.namespace(),
            object_name(&sc_without_auth.metadata),
        );
        let pvc_without_auth = self.create_claim(&pvc_without_auth).await?;

        info!("Creating a pod using the no-auth claim");
        let mut config = self.pod_config.clone();
        config.pvcs = vec![pvc_without_auth];
        self.start_pod(&config).await?;
        Ok(())
    }

    async fn two_auth_classes(&mut self) -> Result<()> {
        let payloads = self.auth_secret_data.len();
        if payloads < 2 {
            return Err(Error::internal(format!(
                "two auth storage classes need 2 secret payloads, driver returned {payloads}"
            )));
        }
        let (sc, pvc, sc_name, pvc_name) = self.resource_objects()?;

        info!("Creating a pod using the claim with secret A");
        let config = self.pod_config.clone();
        self.start_pod(&config).await?;

        info!("Creating secret B");
        let index = rand::thread_rng().gen_range(1..payloads);
        let payload = self.auth_secret_data[index].clone();
        let mut params_b = BTreeMap::new();
        for (key, value) in self.sc_auth_params.clone() {
            if !is_secret_name_param(&key) {
                continue;
            }
            let name_b = format!("{value}{SECRET_B_SUFFIX}");
            self.write_secret(&name_b, &payload).await?;
            params_b.insert(key, name_b);
        }

        info!(payload = index, "Creating a storage class with secret B");
        let mut sc_b = clone_storage_class(&sc, format!("{sc_name}-with{SECRET_B_SUFFIX}"));
        sc_b.parameters.get_or_insert_with(BTreeMap::new).extend(params_b);
        let sc_b = self.create_storage_class(&sc_b).await?;

        info!("Creating a claim using the storage class with secret B");
        let pvc_b = clone_claim(
            &pvc,
            format!("{pvc_name}-with{SECRET_B_SUFFIX}"),
            self.framework.namespace(),
            object_name(&sc_b.metadata),
        );
        let pvc_b = self.create_claim(&pvc_b).await?;

        info!("Creating a pod using the claim with secret B");
        let mut config = self.pod_config.clone();
        config.pvcs = vec![pvc_b];
        self.start_pod(&config).await?;
        Ok(())
    }

    fn resource_objects(&self) -> Result<(StorageClass, PersistentVolumeClaim, String, String)> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| Error::internal("volume resource was not created"))?;
        Ok((
            resource.sc.clone(),
            resource.pvc.clone(),
            resource.sc_name().to_string(),
            resource.pvc_name().to_string(),
        ))
    }

    /// Create or update a secret and remember it for cleanup
    async fn write_secret(&mut self, name: &str, data: &BTreeMap<String, String>) -> Result<()> {
        create_or_update_secret(self.framework.cluster(), self.framework.namespace(), name, data)
            .await
            .map_err(|e| Error::assertion(format!("Failed to create secret {name}: {e}")))?;
        if !self.secret_names.iter().any(|n| n == name) {
            self.secret_names.push(name.to_string());
        }
        Ok(())
    }

    async fn create_storage_class(&mut self, sc: &StorageClass) -> Result<StorageClass> {
        let created = self.framework.cluster().create_storage_class(sc).await?;
        let name = object_name(&created.metadata);
        info!(storage_class = %name, "Created StorageClass");
        self.storage_classes.push(name);
        Ok(created)
    }

    async fn create_claim(&mut self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let created = self
            .framework
            .cluster()
            .create_pvc(self.framework.namespace(), pvc)
            .await?;
        let name = object_name(&created.metadata);
        info!(pvc = %name, "Created PersistentVolumeClaim");
        self.claims.push(name);
        Ok(created)
    }

    /// Start a pod and track it, including one that was created but never ran
    async fn start_pod(&mut self, config: &PodConfig) -> Result<Pod> {
        let timeouts = *self.framework.timeouts();
        match create_sec_pod(
            self.framework.cluster(),
            config,
            timeouts.pod_start_short,
            timeouts.poll_interval,
        )
        .await
        {
            Ok(pod) => {
                self.pods.push(pod.clone());
                Ok(pod)
            }
            Err(PodStartFailure { pod, error }) => {
                self.pods.extend(pod);
                Err(error)
            }
        }
    }

    async fn delete_pod(&mut self, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.as_deref();
        self.pods.retain(|p| p.metadata.name.as_deref() != name);
        let timeouts = self.framework.timeouts();
        delete_pod_with_wait(
            self.framework.cluster(),
            pod,
            timeouts.pod_delete,
            timeouts.poll_interval,
        )
        .await
    }

    async fn delete_tracked_pods(&mut self) -> Result<()> {
        while let Some(pod) = self.pods.pop() {
            self.delete_pod(&pod).await?;
        }
        Ok(())
    }

    /// Delete everything the scenario created; every step is attempted.
    ///
    /// Order: pods, extra claims, the volume resource, extra storage
    /// classes, secrets, then the driver's own cleanup.
    async fn cleanup(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        let cluster = self.framework.cluster();
        let namespace = self.framework.namespace();
        let timeouts = *self.framework.timeouts();

        for pod in self.pods.drain(..).rev() {
            if let Err(e) =
                delete_pod_with_wait(cluster, &pod, timeouts.pod_delete, timeouts.poll_interval)
                    .await
            {
                errors.push(e);
            }
        }

        for claim in self.claims.drain(..).rev() {
            if let Err(e) = delete_claim_and_volume(
                cluster,
                &claim,
                namespace,
                timeouts.claim_delete,
                timeouts.poll_interval,
            )
            .await
            {
                errors.push(e);
            }
        }

        // The main claim's volume is reclaimed with the provisioner secret,
        // so the resource goes before any secret
        if let Some(resource) = self.resource.take() {
            if let Err(e) = resource.cleanup_resource(&self.framework).await {
                errors.push(e);
            }
        }

        for sc in self.storage_classes.drain(..).rev() {
            match cluster.delete_storage_class(&sc).await {
                Err(e) if !e.is_not_found() => errors.push(e),
                _ => {}
            }
        }

        for secret in self.secret_names.drain(..) {
            debug!(secret = %secret, namespace = %namespace, "Deleting secret");
            match cluster.delete_secret(namespace, &secret).await {
                Err(e) if !e.is_not_found() => errors.push(e),
                _ => {}
            }
        }

        if let Some(cleanup) = self.driver_cleanup.take() {
            if let Err(e) = run_driver_cleanup(&self.driver_name, cleanup).await {
                errors.push(e);
            }
        }

        match Error::aggregate(CLEANUP_CONTEXT, errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run a driver's cleanup, turning a panic into an error
async fn run_driver_cleanup(driver_name: &str, cleanup: DriverCleanup) -> Result<()> {
    match AssertUnwindSafe(async move { cleanup().await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::driver(
                driver_name,
                format!("driver cleanup panicked: {message}"),
            ))
        }
    }
}

fn object_name(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

/// Copy of `sc` with fresh metadata carrying only `name`
fn clone_storage_class(sc: &StorageClass, name: String) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name),
            ..Default::default()
        },
        ..sc.clone()
    }
}

/// Copy of `pvc` with fresh metadata, unbound, provisioned from `storage_class`
fn clone_claim(
    pvc: &PersistentVolumeClaim,
    name: String,
    namespace: &str,
    storage_class: String,
) -> PersistentVolumeClaim {
    let mut spec = pvc.spec.clone().unwrap_or_default();
    spec.volume_name = None;
    spec.storage_class_name = Some(storage_class);
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PodStatus, Secret};

    use super::*;
    use crate::framework::cluster::MockClusterOps;
    use crate::framework::suite::run_suite;
    use crate::framework::{AuthTestDriver, DriverInfo, DynamicPvTestDriver, SuiteReport, Timeouts};
    use crate::testsuites::secrets::make_secret;

    const STAGE: &str = "csi.storage.k8s.io/node-stage-secret-name";
    const PUBLISH: &str = "csi.storage.k8s.io/node-publish-secret-name";
    const PROVISIONER: &str = "csi.storage.k8s.io/provisioner-secret-name";

    /// Objects a fake API server currently holds, plus write and delete logs
    #[derive(Default)]
    struct State {
        namespaces: BTreeSet<String>,
        secrets: BTreeMap<String, BTreeMap<String, String>>,
        secret_writes: Vec<(String, BTreeMap<String, String>)>,
        storage_classes: BTreeMap<String, StorageClass>,
        created_classes: Vec<StorageClass>,
        claims: BTreeMap<String, PersistentVolumeClaim>,
        // Bound volumes and the provisioner secret needed to reclaim them
        volumes: BTreeMap<String, Option<String>>,
        created_volumes: usize,
        pods: BTreeMap<String, Pod>,
        // "write secret/<name>=<values>" and "delete <kind>/<name>", in call order
        events: Vec<String>,
        next_claim: usize,
        ignore_credentials: bool,
    }

    impl State {
        fn credentials_consistent(&self) -> bool {
            self.ignore_credentials
                || self
                    .secrets
                    .values()
                    .flat_map(|d| d.values())
                    .all(|v| !v.ends_with("-inconsistent"))
        }

        fn is_empty(&self) -> bool {
            self.secrets.is_empty()
                && self.storage_classes.is_empty()
                && self.claims.is_empty()
                && self.volumes.is_empty()
                && self.pods.is_empty()
                && self.namespaces.is_empty()
        }

        fn position(&self, event: &str) -> Option<usize> {
            self.events.iter().position(|e| e == event)
        }

        fn deleted(&self, kind: &str) -> Vec<usize> {
            let prefix = format!("delete {kind}/");
            self.events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.starts_with(&prefix))
                .map(|(i, _)| i)
                .collect()
        }
    }

    fn not_found(kind: &str, name: &str) -> Error {
        Error::not_found(kind, name)
    }

    /// Mock cluster that behaves like a small API server. Pods run only while
    /// every secret holds consistent credentials. Claims are bound on creation
    /// and their volume is reclaimed on claim deletion only while the
    /// provisioner secret of its storage class still exists.
    fn fake_cluster(state: Arc<Mutex<State>>) -> MockClusterOps {
        let mut cluster = MockClusterOps::new();

        let s = state.clone();
        cluster.expect_create_namespace().returning(move |name| {
            s.lock().unwrap().namespaces.insert(name.to_string());
            Ok(Namespace::default())
        });
        let s = state.clone();
        cluster.expect_delete_namespace().returning(move |name| {
            s.lock().unwrap().namespaces.remove(name);
            Ok(())
        });

        let s = state.clone();
        cluster.expect_get_secret().returning(move |ns, name| {
            Ok(s.lock()
                .unwrap()
                .secrets
                .contains_key(name)
                .then(|| make_secret(ns, name)))
        });
        let write = |s: &Arc<Mutex<State>>, secret: &Secret| {
            let name = secret.metadata.name.clone().unwrap_or_default();
            let data = secret.string_data.clone().unwrap_or_default();
            let mut st = s.lock().unwrap();
            let values: Vec<_> = data.values().cloned().collect();
            st.events
                .push(format!("write secret/{name}={}", values.join(",")));
            st.secrets.insert(name.clone(), data.clone());
            st.secret_writes.push((name, data));
        };
        let s = state.clone();
        cluster.expect_create_secret().returning(move |_, secret| {
            write(&s, secret);
            Ok(secret.clone())
        });
        let s = state.clone();
        cluster.expect_replace_secret().returning(move |_, secret| {
            write(&s, secret);
            Ok(secret.clone())
        });
        let s = state.clone();
        cluster.expect_delete_secret().returning(move |_, name| {
            let mut st = s.lock().unwrap();
            st.events.push(format!("delete secret/{name}"));
            st.secrets
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("Secret", name))
        });

        let s = state.clone();
        cluster.expect_create_storage_class().returning(move |sc| {
            let name = object_name(&sc.metadata);
            let mut st = s.lock().unwrap();
            st.storage_classes.insert(name, sc.clone());
            st.created_classes.push(sc.clone());
            Ok(sc.clone())
        });
        let s = state.clone();
        cluster.expect_delete_storage_class().returning(move |name| {
            let mut st = s.lock().unwrap();
            st.events.push(format!("delete sc/{name}"));
            st.storage_classes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("StorageClass", name))
        });

        let s = state.clone();
        cluster.expect_create_pvc().returning(move |_, pvc| {
            let mut st = s.lock().unwrap();
            let mut pvc = pvc.clone();
            if pvc.metadata.name.is_none() {
                st.next_claim += 1;
                pvc.metadata.name = Some(format!("pvc-{}", st.next_claim));
            }
            let name = object_name(&pvc.metadata);
            let spec = pvc.spec.get_or_insert_with(Default::default);
            let provisioner_secret = spec
                .storage_class_name
                .as_ref()
                .and_then(|sc| st.storage_classes.get(sc))
                .and_then(|sc| sc.parameters.as_ref())
                .and_then(|params| params.get(PROVISIONER))
                .cloned();
            let volume = format!("pv-{name}");
            spec.volume_name = Some(volume.clone());
            st.volumes.insert(volume, provisioner_secret);
            st.created_volumes += 1;
            st.claims.insert(name, pvc.clone());
            Ok(pvc)
        });
        let s = state.clone();
        cluster.expect_get_pvc().returning(move |_, name| {
            s.lock()
                .unwrap()
                .claims
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("PersistentVolumeClaim", name))
        });
        let s = state.clone();
        cluster.expect_delete_pvc().returning(move |_, name| {
            let mut st = s.lock().unwrap();
            st.events.push(format!("delete pvc/{name}"));
            let pvc = st
                .claims
                .remove(name)
                .ok_or_else(|| not_found("PersistentVolumeClaim", name))?;
            let volume = pvc.spec.and_then(|spec| spec.volume_name);
            if let Some(volume) = volume {
                let reclaimable = match st.volumes.get(&volume) {
                    Some(Some(secret)) => st.secrets.contains_key(secret),
                    _ => true,
                };
                if reclaimable {
                    st.volumes.remove(&volume);
                }
            }
            Ok(())
        });

        let s = state.clone();
        cluster.expect_get_pv().returning(move |name| {
            s.lock()
                .unwrap()
                .volumes
                .contains_key(name)
                .then(PersistentVolume::default)
                .ok_or_else(|| not_found("PersistentVolume", name))
        });
        let s = state.clone();
        cluster.expect_delete_pv().returning(move |name| {
            let mut st = s.lock().unwrap();
            st.events.push(format!("delete pv/{name}"));
            st.volumes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("PersistentVolume", name))
        });

        let s = state.clone();
        cluster.expect_create_pod().returning(move |_, pod| {
            s.lock()
                .unwrap()
                .pods
                .insert(object_name(&pod.metadata), pod.clone());
            Ok(pod.clone())
        });
        let s = state.clone();
        cluster.expect_get_pod().returning(move |_, name| {
            let st = s.lock().unwrap();
            let mut pod = st
                .pods
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("Pod", name))?;
            let phase = if st.credentials_consistent() {
                "Running"
            } else {
                "Pending"
            };
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
            Ok(pod)
        });
        let s = state;
        cluster.expect_delete_pod().returning(move |_, name| {
            let mut st = s.lock().unwrap();
            st.events.push(format!("delete pod/{name}"));
            st.pods
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("Pod", name))
        });

        cluster
    }

    struct FakeDriver {
        info: DriverInfo,
        secret_data: Vec<BTreeMap<String, String>>,
        match_group: Option<Vec<Vec<CsiStorageClassAuthParamKey>>>,
        dynamic: bool,
        auth: bool,
        panic_on_cleanup: bool,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                info: DriverInfo {
                    name: "fake.csi.k8s.io".to_string(),
                    ..Default::default()
                },
                secret_data: vec![payload("alice"), payload("bob")],
                match_group: Some(vec![vec![
                    CsiStorageClassAuthParamKey::NodeStageSecretName,
                    CsiStorageClassAuthParamKey::NodePublishSecretName,
                ]]),
                dynamic: true,
                auth: true,
                panic_on_cleanup: false,
            }
        }
    }

    fn payload(user: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("username".to_string(), user.to_string())])
    }

    #[async_trait]
    impl TestDriver for FakeDriver {
        fn driver_info(&self) -> &DriverInfo {
            &self.info
        }

        async fn prepare_test(
            &self,
            framework: &Framework,
        ) -> Result<(PerTestConfig, Option<DriverCleanup>)> {
            let config = PerTestConfig {
                driver_name: self.info.name.clone(),
                prefix: "fake".to_string(),
                framework_namespace: framework.namespace().to_string(),
                ..Default::default()
            };
            let panic_on_cleanup = self.panic_on_cleanup;
            let cleanup: DriverCleanup = Box::new(move || -> BoxFuture<'static, Result<()>> {
                Box::pin(async move {
                    if panic_on_cleanup {
                        panic!("driver teardown exploded");
                    }
                    Ok(())
                })
            });
            Ok((config, Some(cleanup)))
        }

        fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
            self.dynamic.then_some(self as &dyn DynamicPvTestDriver)
        }

        fn as_auth(&self) -> Option<&dyn AuthTestDriver> {
            self.auth.then_some(self as &dyn AuthTestDriver)
        }
    }

    impl DynamicPvTestDriver for FakeDriver {
        fn dynamic_provisioner_storage_class(
            &self,
            config: &PerTestConfig,
            _fs_type: &str,
        ) -> Option<StorageClass> {
            let mut parameters = BTreeMap::from([("type".to_string(), "fast".to_string())]);
            parameters.extend(self.storage_class_auth_parameters(config));
            Some(StorageClass {
                provisioner: self.info.name.clone(),
                parameters: Some(parameters),
                ..Default::default()
            })
        }
    }

    impl AuthTestDriver for FakeDriver {
        fn auth_secret_data(&self) -> Vec<BTreeMap<String, String>> {
            self.secret_data.clone()
        }

        fn auth_match_group(&self) -> Option<Vec<Vec<CsiStorageClassAuthParamKey>>> {
            self.match_group.clone()
        }

        fn storage_class_auth_parameters(
            &self,
            config: &PerTestConfig,
        ) -> BTreeMap<String, String> {
            let ns = config.framework_namespace.clone();
            BTreeMap::from([
                (PROVISIONER.to_string(), "auth-prov".to_string()),
                (
                    "csi.storage.k8s.io/provisioner-secret-namespace".to_string(),
                    ns.clone(),
                ),
                (STAGE.to_string(), "auth-stage".to_string()),
                (
                    "csi.storage.k8s.io/node-stage-secret-namespace".to_string(),
                    ns.clone(),
                ),
                (PUBLISH.to_string(), "auth-publish".to_string()),
                (
                    "csi.storage.k8s.io/node-publish-secret-namespace".to_string(),
                    ns,
                ),
            ])
        }
    }

    fn options(state: &Arc<Mutex<State>>) -> FrameworkOptions {
        let mut options = FrameworkOptions::new("auth", Arc::new(fake_cluster(state.clone())));
        options.timeouts = Timeouts {
            pod_start_short: Duration::from_millis(50),
            pod_delete: Duration::from_secs(1),
            claim_delete: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
        };
        options
    }

    async fn run(
        driver: &FakeDriver,
        state: &Arc<Mutex<State>>,
        focus: Option<&str>,
    ) -> SuiteReport {
        run_suite(&init_auth_test_suite(), driver, &options(state), focus).await
    }

    fn outcome<'a>(report: &'a SuiteReport, scenario: AuthScenario) -> &'a TestOutcome {
        &report
            .results
            .iter()
            .find(|r| r.name == scenario.name())
            .unwrap()
            .outcome
    }

    #[test]
    fn drivers_without_capabilities_are_skipped() {
        let suite = init_auth_test_suite();

        let mut driver = FakeDriver::new();
        driver.dynamic = false;
        assert_eq!(
            suite.skip_unsupported_tests(&driver, &AUTH_DYNAMIC_PV).unwrap(),
            "Driver fake.csi.k8s.io doesn't support DynamicPV -- skipping"
        );

        let mut driver = FakeDriver::new();
        driver.auth = false;
        assert_eq!(
            suite.skip_unsupported_tests(&driver, &AUTH_DYNAMIC_PV).unwrap(),
            "Driver fake.csi.k8s.io does not support auth -- skipping"
        );

        assert!(suite
            .skip_unsupported_tests(&FakeDriver::new(), &AUTH_DYNAMIC_PV)
            .is_none());
    }

    #[test]
    fn suite_lists_every_scenario() {
        let suite = init_auth_test_suite();
        assert_eq!(suite.info().name, "auth");
        assert_eq!(suite.info().test_patterns, vec![AUTH_DYNAMIC_PV]);
        assert_eq!(suite.test_names().len(), 4);
    }

    #[test]
    fn body_failure_is_reported_before_cleanup_failure() {
        assert_eq!(combine_outcome(Ok(()), Ok(())), TestOutcome::Passed);

        let outcome = combine_outcome(
            Err(Error::assertion("pod never ran")),
            Err(Error::aggregate(CLEANUP_CONTEXT, vec![Error::internal("secret stuck")]).unwrap()),
        );
        let TestOutcome::Failed(reason) = outcome else {
            panic!("expected failure");
        };
        assert!(reason.starts_with("assertion failed: pod never ran"), "{reason}");
        assert!(reason.contains(CLEANUP_CONTEXT));
    }

    #[tokio::test]
    async fn binding_with_current_secret_passes_and_cleans_up() {
        let state = Arc::new(Mutex::new(State::default()));
        let report = run(&FakeDriver::new(), &state, Some("success using current")).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(outcome(&report, AuthScenario::BindWithCurrentSecret), &TestOutcome::Passed);

        let st = state.lock().unwrap();
        assert!(st.is_empty(), "objects left behind");
        // Provisioner secret is written before the claim, the rest after
        assert_eq!(st.secret_writes[0].0, "auth-prov");
        let written: BTreeSet<_> = st.secret_writes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(written, BTreeSet::from(["auth-prov", "auth-publish", "auth-stage"]));
        assert!(st.secret_writes.iter().all(|(_, d)| d == &payload("alice")));
    }

    #[tokio::test]
    async fn inconsistent_match_group_keeps_pod_from_starting() {
        let state = Arc::new(Mutex::new(State::default()));
        let report = run(&FakeDriver::new(), &state, Some("inconsistent")).await;

        assert_eq!(outcome(&report, AuthScenario::InconsistentMatchGroup), &TestOutcome::Passed);
        let st = state.lock().unwrap();
        assert!(st.is_empty());
        assert!(st
            .secret_writes
            .iter()
            .any(|(n, d)| (n == "auth-stage" || n == "auth-publish")
                && d["username"] == "alice-inconsistent"));
    }

    #[tokio::test]
    async fn inconsistent_secret_that_still_binds_fails_the_test() {
        let state = Arc::new(Mutex::new(State {
            ignore_credentials: true,
            ..Default::default()
        }));
        let report = run(&FakeDriver::new(), &state, Some("inconsistent")).await;

        let TestOutcome::Failed(reason) = outcome(&report, AuthScenario::InconsistentMatchGroup)
        else {
            panic!("expected failure");
        };
        assert!(reason.contains("reached Running although secret"), "{reason}");
        assert!(state.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_multi_stage_match_group_is_checked_then_restored() {
        let state = Arc::new(Mutex::new(State::default()));
        let mut driver = FakeDriver::new();
        driver.match_group = Some(vec![
            vec![
                CsiStorageClassAuthParamKey::NodeStageSecretName,
                CsiStorageClassAuthParamKey::NodePublishSecretName,
            ],
            vec![CsiStorageClassAuthParamKey::ProvisionerSecretName],
            vec![
                CsiStorageClassAuthParamKey::NodeStageSecretName,
                CsiStorageClassAuthParamKey::NodePublishSecretName,
            ],
        ]);
        let report = run(&driver, &state, Some("inconsistent")).await;

        assert_eq!(outcome(&report, AuthScenario::InconsistentMatchGroup), &TestOutcome::Passed);
        let st = state.lock().unwrap();
        assert!(st.is_empty(), "objects left behind");

        // The single-stage group is never touched; only setup writes its secret
        let provisioner_writes: Vec<_> = st
            .secret_writes
            .iter()
            .filter(|(n, _)| n == "auth-prov")
            .collect();
        assert!(!provisioner_writes.is_empty());
        assert!(provisioner_writes.iter().all(|(_, d)| d == &payload("alice")));

        // One inconsistent write per multi-stage group, each restored right after
        let inconsistent: Vec<usize> = st
            .secret_writes
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| d["username"] == "alice-inconsistent")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(inconsistent.len(), 2);
        for i in &inconsistent {
            let (name, _) = &st.secret_writes[*i];
            assert_eq!(st.secret_writes[i + 1], (name.clone(), payload("alice")));
        }

        // The first group's pod is gone before the second group starts
        let bad_writes: Vec<usize> = st
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("write ") && e.ends_with("-inconsistent"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(bad_writes.len(), 2);
        assert!(
            st.events[bad_writes[0]..bad_writes[1]]
                .iter()
                .any(|e| e.starts_with("delete pod/")),
            "{:?}",
            st.events
        );
    }

    #[tokio::test]
    async fn no_auth_and_auth_classes_coexist() {
        let state = Arc::new(Mutex::new(State::default()));
        let report = run(&FakeDriver::new(), &state, Some("no-auth-storageclass")).await;

        assert_eq!(outcome(&report, AuthScenario::AuthAndNoAuthClasses), &TestOutcome::Passed);
        let st = state.lock().unwrap();
        assert!(st.is_empty(), "objects left behind");
        // Both claims were bound, and both volumes went away with their claim
        assert_eq!(st.created_volumes, 2);
        assert!(st.deleted("pv").is_empty(), "{:?}", st.events);
        assert_eq!(st.deleted("pod").len(), 2);

        let without_auth = st
            .created_classes
            .iter()
            .find(|sc| object_name(&sc.metadata).ends_with(WITHOUT_AUTH_SUFFIX))
            .unwrap();
        let params = without_auth.parameters.as_ref().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["type"], "fast");
    }

    #[tokio::test]
    async fn second_auth_class_uses_secret_b() {
        let state = Arc::new(Mutex::new(State::default()));
        let report = run(&FakeDriver::new(), &state, Some("Two auth-storageclass")).await;

        assert_eq!(outcome(&report, AuthScenario::TwoAuthClasses), &TestOutcome::Passed);
        let st = state.lock().unwrap();
        assert!(st.is_empty(), "objects left behind");
        assert_eq!(st.created_volumes, 2);
        assert!(st.deleted("pv").is_empty(), "{:?}", st.events);
        assert!(st.position("delete secret/auth-prov-secret-b").is_some());

        let sc_b = st
            .created_classes
            .iter()
            .find(|sc| object_name(&sc.metadata).ends_with("-with-secret-b"))
            .unwrap();
        let params = sc_b.parameters.as_ref().unwrap();
        assert_eq!(params[STAGE], "auth-stage-secret-b");
        assert_eq!(params[PUBLISH], "auth-publish-secret-b");
        assert_eq!(params["type"], "fast");

        let b_writes: Vec<_> = st
            .secret_writes
            .iter()
            .filter(|(n, _)| n.ends_with(SECRET_B_SUFFIX))
            .collect();
        assert_eq!(b_writes.len(), 3);
        assert!(b_writes.iter().all(|(_, d)| d == &payload("bob")));
    }

    #[tokio::test]
    async fn second_auth_class_is_skipped_with_one_payload() {
        let state = Arc::new(Mutex::new(State::default()));
        let mut driver = FakeDriver::new();
        driver.secret_data.truncate(1);
        let report = run(&driver, &state, Some("Two auth-storageclass")).await;

        assert!(matches!(
            outcome(&report, AuthScenario::TwoAuthClasses),
            TestOutcome::Skipped(_)
        ));
        assert!(state.lock().unwrap().namespaces.is_empty());
        assert!(state.lock().unwrap().secret_writes.is_empty());
    }

    #[tokio::test]
    async fn empty_secret_data_fails_every_scenario() {
        let state = Arc::new(Mutex::new(State::default()));
        let mut driver = FakeDriver::new();
        driver.secret_data.clear();
        let report = run(&driver, &state, Some("success using current")).await;

        let TestOutcome::Failed(reason) = outcome(&report, AuthScenario::BindWithCurrentSecret)
        else {
            panic!("expected failure");
        };
        assert!(reason.contains("must return at least one map"), "{reason}");
        assert!(state.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn secrets_are_deleted_after_the_volumes_they_reclaim() {
        let state = Arc::new(Mutex::new(State::default()));
        let report = run(&FakeDriver::new(), &state, Some("success using current")).await;

        assert_eq!(outcome(&report, AuthScenario::BindWithCurrentSecret), &TestOutcome::Passed);
        let st = state.lock().unwrap();
        assert!(st.is_empty(), "objects left behind");
        assert_eq!(st.created_volumes, 1);
        // Reclaimed by the provisioner, never deleted directly
        assert!(st.deleted("pv").is_empty(), "{:?}", st.events);

        let first_secret = st.deleted("secret")[0];
        let last_claim = *st.deleted("pvc").last().unwrap();
        let last_class = *st.deleted("sc").last().unwrap();
        assert!(last_claim < first_secret, "{:?}", st.events);
        assert!(last_class < first_secret, "{:?}", st.events);
        assert!(st.position("delete secret/auth-prov").unwrap() > last_claim);
    }

    #[tokio::test]
    async fn driver_cleanup_panic_fails_the_test() {
        let state = Arc::new(Mutex::new(State::default()));
        let mut driver = FakeDriver::new();
        driver.panic_on_cleanup = true;
        let report = run(&driver, &state, Some("success using current")).await;

        let TestOutcome::Failed(reason) = outcome(&report, AuthScenario::BindWithCurrentSecret)
        else {
            panic!("expected failure");
        };
        assert!(reason.contains(CLEANUP_CONTEXT), "{reason}");
        assert!(reason.contains("driver teardown exploded"), "{reason}");
        assert!(state.lock().unwrap().is_empty());
    }

    #[test]
    fn cloned_claims_are_unbound_and_repointed() {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("pvc-1".to_string()),
                uid: Some("abc".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::PersistentVolumeClaimSpec {
                volume_name: Some("pv-1".to_string()),
                storage_class_name: Some("auth-sc".to_string()),
                ..Default::default()
            }),
            status: None,
        };

        let clone = clone_claim(&pvc, "pvc-1-without-auth".to_string(), "ns", "other".to_string());
        assert_eq!(clone.metadata.uid, None);
        let spec = clone.spec.unwrap();
        assert_eq!(spec.volume_name, None);
        assert_eq!(spec.storage_class_name.as_deref(), Some("other"));
    }
}
