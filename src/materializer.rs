//! Graph materializer
//!
//! Walks a [`ResourceGraph`] and drives every resource through the provider
//! that owns its kind. Each resource runs as its own task and suspends on the
//! output cells of its dependencies, so unrelated subgraphs proceed in
//! parallel while a resource never starts before everything it depends on is
//! ready.
//!
//! Failure handling is configuration, not hard-coding:
//!
//! - [`RetryConfig`] bounds how often a retryable provider error is retried
//! - [`FailurePolicy`] decides whether one failure cancels the whole graph
//! - [`TeardownPolicy`] decides whether ready resources are rolled back

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::graph::{OutputRef, ResourceGraph, ResourceHandle};
use crate::output::{OutputAttributes, OutputStore, Phase, ResourceState};
use crate::provider::{ProviderRequest, ProviderSet, ResourceProvider};
use crate::retry::{retry_if, RetryConfig};
use crate::{Error, Result};

/// What happens to the rest of the graph when one resource fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel every resource that has not finished yet
    #[default]
    FailFast,
    /// Let unrelated subgraphs finish; only dependents of the failure fail
    Continue,
}

/// What happens to ready resources after a failed run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Keep them for inspection
    #[default]
    LeaveInPlace,
    /// Destroy them in reverse dependency order
    Rollback,
}

/// Materializer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaterializerConfig {
    /// Maximum number of resources submitted at the same time
    pub concurrency: usize,
    /// Retry policy for provider calls
    pub retry: RetryConfig,
    /// Failure propagation
    pub on_failure: FailurePolicy,
    /// Cleanup after failure
    pub teardown: TeardownPolicy,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry: RetryConfig::default(),
            on_failure: FailurePolicy::default(),
            teardown: TeardownPolicy::default(),
        }
    }
}

/// Outcome of a materialization run, successful or not
#[derive(Debug, Default)]
pub struct MaterializeReport {
    /// Outputs of every resource that reached `ready` (and was not rolled back)
    pub outputs: BTreeMap<ResourceHandle, Arc<OutputAttributes>>,
    /// Final phase of every resource
    pub phases: BTreeMap<ResourceHandle, Phase>,
    /// Failures, root causes first
    pub failures: Vec<(ResourceHandle, Error)>,
    /// Resources destroyed by rollback, in deletion order
    pub rolled_back: Vec<ResourceHandle>,
}

impl MaterializeReport {
    /// Whether every resource became ready
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert into the outputs, or the root-cause failure
    pub fn into_result(mut self) -> Result<Materialization> {
        if self.failures.is_empty() {
            Ok(Materialization {
                outputs: self.outputs,
            })
        } else {
            Err(self.failures.swap_remove(0).1)
        }
    }
}

/// Outputs of a fully materialized graph
#[derive(Debug, Clone, Default)]
pub struct Materialization {
    outputs: BTreeMap<ResourceHandle, Arc<OutputAttributes>>,
}

impl Materialization {
    /// Wrap previously recorded outputs
    pub fn from_outputs(outputs: BTreeMap<ResourceHandle, Arc<OutputAttributes>>) -> Self {
        Self { outputs }
    }

    /// Outputs of one resource
    pub fn get(&self, handle: ResourceHandle) -> Option<&Arc<OutputAttributes>> {
        self.outputs.get(&handle)
    }

    /// Value of one output attribute
    pub fn output(&self, output: &OutputRef) -> Option<&Value> {
        self.outputs
            .get(&output.resource)
            .and_then(|attrs| attrs.get(&output.attribute))
    }

    /// Every resource's outputs
    pub fn outputs(&self) -> &BTreeMap<ResourceHandle, Arc<OutputAttributes>> {
        &self.outputs
    }

    /// Number of materialized resources
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether nothing was materialized
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Drives a graph through its providers
#[derive(Debug, Clone)]
pub struct Materializer {
    providers: ProviderSet,
    config: MaterializerConfig,
}

impl Materializer {
    /// Create a materializer
    pub fn new(providers: ProviderSet, config: MaterializerConfig) -> Self {
        Self { providers, config }
    }

    /// Settings in use
    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Materialize every resource, failing with the root-cause
    /// [`Error::Materialization`] if any resource fails.
    pub async fn materialize(&self, graph: &ResourceGraph) -> Result<Materialization> {
        self.materialize_report(graph).await?.into_result()
    }

    /// Materialize every resource and report per-resource outcomes.
    ///
    /// Only graph-level problems (a cycle) are returned as `Err`; resource
    /// failures are listed in the report.
    #[instrument(skip(self, graph), fields(resources = graph.len()))]
    pub async fn materialize_report(&self, graph: &ResourceGraph) -> Result<MaterializeReport> {
        let order = graph.topological_order()?;
        let graph = Arc::new(graph.clone());
        let store = Arc::new(OutputStore::for_graph(&graph));
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        info!(resources = order.len(), "materializing graph");

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(order.len());
        for handle in order {
            let kind = graph.resource(handle)?.id.kind;
            let task = ResourceTask {
                graph: graph.clone(),
                store: store.clone(),
                provider: self.providers.for_kind(kind).clone(),
                retry: self.config.retry.clone(),
                on_failure: self.config.on_failure,
                permits: permits.clone(),
                cancel: cancel.clone(),
            };
            let abort = tasks.spawn(task.run(handle));
            spawned.insert(abort.id(), handle);
        }

        let mut root_causes = Vec::new();
        let mut consequences = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (handle, result) = match joined {
                Ok((id, result)) => match spawned.get(&id) {
                    Some(handle) => (*handle, result),
                    None => continue,
                },
                Err(e) => {
                    let Some(handle) = spawned.get(&e.id()).copied() else {
                        error!(error = %e, "unknown resource task aborted");
                        cancel.cancel();
                        continue;
                    };
                    let name = resource_name(&graph, handle);
                    error!(resource = %name, error = %e, "resource task aborted");
                    // Settle the cell so dependents stop waiting on it
                    store.set(handle, ResourceState::Failed(e.to_string()))?;
                    if self.config.on_failure == FailurePolicy::FailFast {
                        cancel.cancel();
                    }
                    let cause = Error::external("local", format!("task aborted: {e}"));
                    root_causes.push((handle, Error::materialization(name, cause)));
                    continue;
                }
            };
            if let Err(e) = result {
                if is_consequence(&e) {
                    consequences.push((handle, e));
                } else {
                    root_causes.push((handle, e));
                }
            }
        }

        let mut report = MaterializeReport {
            outputs: store.ready_outputs(),
            phases: graph
                .handles()
                .filter_map(|h| store.state(h).ok().map(|s| (h, s.phase())))
                .collect(),
            failures: root_causes.into_iter().chain(consequences).collect(),
            rolled_back: Vec::new(),
        };

        if report.is_success() {
            info!(resources = report.outputs.len(), "graph materialized");
            return Ok(report);
        }

        warn!(
            failed = report.failures.len(),
            ready = report.outputs.len(),
            "graph materialization failed"
        );

        if self.config.teardown == TeardownPolicy::Rollback && !report.outputs.is_empty() {
            info!(resources = report.outputs.len(), "rolling back ready resources");
            let (destroyed, errors) = self.destroy_outputs(&graph, &report.outputs).await?;
            for h in &destroyed {
                report.outputs.remove(h);
            }
            for (h, e) in errors {
                error!(resource = %resource_name(&graph, h), error = %e, "rollback failed");
            }
            report.rolled_back = destroyed;
        }

        Ok(report)
    }

    /// Destroy previously materialized resources in reverse dependency order.
    ///
    /// Resources without recorded outputs and read-only kinds are skipped.
    /// Deletion continues past failures; the first failure is returned after
    /// every other resource was attempted.
    #[instrument(skip_all, fields(resources = materialized.len()))]
    pub async fn destroy(
        &self,
        graph: &ResourceGraph,
        materialized: &Materialization,
    ) -> Result<Vec<ResourceHandle>> {
        let (destroyed, mut errors) = self.destroy_outputs(graph, materialized.outputs()).await?;
        if errors.is_empty() {
            Ok(destroyed)
        } else {
            Err(errors.swap_remove(0).1)
        }
    }

    async fn destroy_outputs(
        &self,
        graph: &ResourceGraph,
        outputs: &BTreeMap<ResourceHandle, Arc<OutputAttributes>>,
    ) -> Result<(Vec<ResourceHandle>, Vec<(ResourceHandle, Error)>)> {
        let lookup = |r: &OutputRef| -> Result<Value> {
            outputs
                .get(&r.resource)
                .and_then(|attrs| attrs.get(&r.attribute))
                .cloned()
                .ok_or_else(|| Error::unresolved(resource_name(graph, r.resource), &r.attribute))
        };

        let mut destroyed = Vec::new();
        let mut errors = Vec::new();

        for handle in graph.reverse_topological_order()? {
            let Some(attrs) = outputs.get(&handle) else {
                continue;
            };
            let resource = graph.resource(handle)?;
            if resource.id.kind.is_read_only() {
                continue;
            }
            let name = resource.id.to_string();

            let result = async {
                let spec = resource.spec.resolve(&lookup)?;
                let request = ProviderRequest::new(resource.id.clone(), spec);
                let provider = self.providers.for_kind(resource.id.kind);
                retry_if(&self.config.retry, &name, Error::is_retryable, || {
                    provider.delete(&request, attrs)
                })
                .await
            }
            .await;

            match result {
                Ok(()) => {
                    info!(resource = %name, "destroyed");
                    destroyed.push(handle);
                }
                Err(e) => {
                    warn!(resource = %name, error = %e, "destroy failed");
                    errors.push((handle, Error::materialization(name, e)));
                }
            }
        }

        Ok((destroyed, errors))
    }
}

/// Failures caused by another resource failing rather than by the resource
fn is_consequence(err: &Error) -> bool {
    match err {
        Error::Cancelled(_) => true,
        Error::Materialization { cause, .. } => is_consequence(cause),
        _ => false,
    }
}

fn resource_name(graph: &ResourceGraph, handle: ResourceHandle) -> String {
    graph
        .resource(handle)
        .map(|r| r.id.to_string())
        .unwrap_or_else(|_| format!("#{}", handle.index()))
}

/// Everything one resource task needs
struct ResourceTask {
    graph: Arc<ResourceGraph>,
    store: Arc<OutputStore>,
    provider: Arc<dyn ResourceProvider>,
    retry: RetryConfig,
    on_failure: FailurePolicy,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ResourceTask {
    async fn run(self, handle: ResourceHandle) -> Result<()> {
        let resource = self.graph.resource(handle)?;
        let name = resource.id.to_string();

        match self.materialize(handle, &name).await {
            Ok(outputs) => {
                debug!(resource = %name, outputs = ?outputs, "ready");
                self.store.set(handle, ResourceState::Ready(Arc::new(outputs)))?;
                Ok(())
            }
            Err(e) => {
                let consequence = is_consequence(&e);
                if consequence {
                    debug!(resource = %name, reason = %e, "not attempted");
                } else {
                    error!(resource = %name, error = %e, "materialization failed");
                    if self.on_failure == FailurePolicy::FailFast {
                        self.cancel.cancel();
                    }
                }
                self.store
                    .set(handle, ResourceState::Failed(e.to_string()))?;
                Err(Error::materialization(name, e))
            }
        }
    }

    async fn materialize(&self, handle: ResourceHandle, name: &str) -> Result<OutputAttributes> {
        let resource = self.graph.resource(handle)?;

        for dep in resource.dependencies() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::cancelled(format!("{name} cancelled while waiting")));
                }
                ready = self.store.wait_ready(*dep) => {
                    ready?;
                }
            }
        }

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Error::cancelled(format!("{name} cancelled before submission")));
            }
            permit = self.permits.acquire() => permit
                .map_err(|_| Error::cancelled("materializer shut down"))?,
        };

        self.store.set(handle, ResourceState::Materializing)?;
        let spec = resource.spec.resolve(&|r: &OutputRef| self.store.get(r))?;
        let request = ProviderRequest::new(resource.id.clone(), spec);
        info!(resource = %name, "materializing");

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::cancelled(format!("{name} cancelled during submission")))
            }
            created = retry_if(&self.retry, name, Error::is_retryable, || {
                self.provider.create(&request)
            }) => created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResourceKind, ResourceSpec};
    use crate::provider::MockResourceProvider;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn no_retry() -> MaterializerConfig {
        MaterializerConfig {
            retry: RetryConfig::none(),
            ..Default::default()
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Mock that records create/delete order and echoes the resolved spec
    fn recording_mock(
        log: Arc<Mutex<Vec<String>>>,
        fail: Option<&'static str>,
    ) -> MockResourceProvider {
        let mut mock = MockResourceProvider::new();
        let create_log = log.clone();
        mock.expect_create().returning(move |req| {
            create_log.lock().unwrap().push(format!("create {}", req.id));
            if Some(req.name()) == fail {
                return Err(Error::external("cloud", format!("{} rejected", req.id)));
            }
            Ok(OutputAttributes::new()
                .with("name", req.name())
                .with("spec", req.spec.clone()))
        });
        mock.expect_delete().returning(move |req, _| {
            log.lock().unwrap().push(format!("delete {}", req.id));
            Ok(())
        });
        mock
    }

    fn chain_graph() -> (ResourceGraph, [ResourceHandle; 3]) {
        let mut g = ResourceGraph::new();
        let cluster = g
            .declare(ResourceKind::ContainerCluster, "demo", ResourceSpec::new(), &[])
            .unwrap();
        let ns = g
            .declare(
                ResourceKind::Namespace,
                "kafka",
                ResourceSpec::new().field("cluster", cluster.output("name")),
                &[],
            )
            .unwrap();
        let op = g
            .declare(
                ResourceKind::ManifestFile,
                "strimzi-operator",
                ResourceSpec::new().field("namespace", ns.output("name")),
                &[],
            )
            .unwrap();
        (g, [cluster, ns, op])
    }

    #[tokio::test]
    async fn materializes_chain_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers = ProviderSet::uniform(Arc::new(recording_mock(log.clone(), None)));
        let (graph, [cluster, ns, op]) = chain_graph();

        let result = Materializer::new(providers, no_retry())
            .materialize(&graph)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "create ContainerCluster/demo",
                "create Namespace/kafka",
                "create ManifestFile/strimzi-operator",
            ]
        );
        assert_eq!(result.len(), 3);
        // Output references were substituted before submission
        assert_eq!(result.get(ns).unwrap().get("spec").unwrap()["cluster"], "demo");
        assert_eq!(result.get(op).unwrap().get("spec").unwrap()["namespace"], "kafka");
        assert_eq!(result.output(&cluster.output("name")).unwrap(), "demo");
    }

    #[tokio::test]
    async fn independent_resources_run_concurrently() {
        // Two roots that each wait for the other to start: only completes if
        // both are in flight at the same time.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut mock = MockResourceProvider::new();
        mock.expect_create().returning(|req| Ok(OutputAttributes::new().with("name", req.name())));
        let inner = Arc::new(mock);

        struct Gate {
            barrier: Arc<tokio::sync::Barrier>,
            inner: Arc<MockResourceProvider>,
        }
        #[async_trait::async_trait]
        impl ResourceProvider for Gate {
            async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
                self.barrier.wait().await;
                self.inner.create(request).await
            }
            async fn delete(&self, _: &ProviderRequest, _: &OutputAttributes) -> Result<()> {
                Ok(())
            }
        }

        let mut g = ResourceGraph::new();
        g.declare(ResourceKind::Namespace, "a", ResourceSpec::new(), &[]).unwrap();
        g.declare(ResourceKind::Namespace, "b", ResourceSpec::new(), &[]).unwrap();

        let providers = ProviderSet::uniform(Arc::new(Gate { barrier, inner }));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            Materializer::new(providers, no_retry()).materialize(&g),
        )
        .await
        .expect("independent resources should not serialize");
        assert_eq!(result.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_is_reported_with_resource_and_dependents_never_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers = ProviderSet::uniform(Arc::new(recording_mock(log.clone(), Some("kafka"))));
        let (graph, [_, ns, op]) = chain_graph();

        let report = Materializer::new(providers, no_retry())
            .materialize_report(&graph)
            .await
            .unwrap();

        assert!(!log.lock().unwrap().iter().any(|l| l.contains("strimzi-operator")));
        assert_eq!(report.phases[&ns], Phase::Failed);
        assert_eq!(report.phases[&op], Phase::Failed);

        let err = report.into_result().unwrap_err();
        match err {
            Error::Materialization { resource, cause } => {
                assert_eq!(resource, "Namespace/kafka");
                assert!(matches!(*cause, Error::ExternalApi { .. }));
            }
            other => panic!("expected Materialization, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_provider_fails_the_run() {
        let mut mock = MockResourceProvider::new();
        mock.expect_create().returning(|req| {
            if req.name() == "leaf" {
                panic!("provider bug");
            }
            Ok(OutputAttributes::new().with("name", req.name()))
        });

        let mut g = ResourceGraph::new();
        let root = g
            .declare(ResourceKind::Namespace, "root", ResourceSpec::new(), &[])
            .unwrap();
        let leaf = g
            .declare(ResourceKind::CustomResource, "leaf", ResourceSpec::new(), &[root])
            .unwrap();

        let report = Materializer::new(ProviderSet::uniform(Arc::new(mock)), no_retry())
            .materialize_report(&g)
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures[0].0, leaf);
        assert_eq!(report.phases[&leaf], Phase::Failed);
        match report.into_result().unwrap_err() {
            Error::Materialization { resource, cause } => {
                assert_eq!(resource, "CustomResource/leaf");
                assert!(cause.to_string().contains("task aborted"));
            }
            other => panic!("expected Materialization, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_dependency_settles_its_dependents() {
        let mut mock = MockResourceProvider::new();
        mock.expect_create().returning(|req| {
            if req.name() == "root" {
                panic!("provider bug");
            }
            Ok(OutputAttributes::new().with("name", req.name()))
        });

        let mut g = ResourceGraph::new();
        let root = g
            .declare(ResourceKind::Namespace, "root", ResourceSpec::new(), &[])
            .unwrap();
        let child = g
            .declare(ResourceKind::CustomResource, "child", ResourceSpec::new(), &[root])
            .unwrap();

        let config = MaterializerConfig {
            on_failure: FailurePolicy::Continue,
            ..no_retry()
        };
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            Materializer::new(ProviderSet::uniform(Arc::new(mock)), config).materialize_report(&g),
        )
        .await
        .expect("dependents of an aborted task must not hang")
        .unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].0, root);
        assert_eq!(report.failures[1].0, child);
        assert_eq!(report.phases[&child], Phase::Failed);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_up_to_the_limit() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let mut mock = MockResourceProvider::new();
        mock.expect_create().returning(move |_| {
            if a.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::external_retryable("cloud", "503 backend unavailable"))
            } else {
                Ok(OutputAttributes::new())
            }
        });

        let mut g = ResourceGraph::new();
        g.declare(ResourceKind::StorageBucket, "berglas", ResourceSpec::new(), &[])
            .unwrap();

        let config = MaterializerConfig {
            retry: fast_retry(3),
            ..Default::default()
        };
        Materializer::new(ProviderSet::uniform(Arc::new(mock)), config)
            .materialize(&g)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let mut mock = MockResourceProvider::new();
        mock.expect_create()
            .times(1)
            .returning(|_| Err(Error::external("cloud", "400 invalid bucket name")));

        let mut g = ResourceGraph::new();
        g.declare(ResourceKind::StorageBucket, "Bad_Name", ResourceSpec::new(), &[])
            .unwrap();

        let config = MaterializerConfig {
            retry: fast_retry(5),
            ..Default::default()
        };
        let err = Materializer::new(ProviderSet::uniform(Arc::new(mock)), config)
            .materialize(&g)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid bucket name"));
    }

    #[tokio::test]
    async fn continue_policy_lets_unrelated_subgraphs_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers = ProviderSet::uniform(Arc::new(recording_mock(log.clone(), Some("broken"))));

        let mut g = ResourceGraph::new();
        let broken = g
            .declare(ResourceKind::Namespace, "broken", ResourceSpec::new(), &[])
            .unwrap();
        let child = g
            .declare(ResourceKind::CustomResource, "child", ResourceSpec::new(), &[broken])
            .unwrap();
        let healthy = g
            .declare(ResourceKind::Namespace, "healthy", ResourceSpec::new(), &[])
            .unwrap();
        let healthy_child = g
            .declare(ResourceKind::Deployment, "healthy-child", ResourceSpec::new(), &[healthy])
            .unwrap();

        let config = MaterializerConfig {
            on_failure: FailurePolicy::Continue,
            ..no_retry()
        };
        let report = Materializer::new(providers, config)
            .materialize_report(&g)
            .await
            .unwrap();

        assert_eq!(report.phases[&healthy], Phase::Ready);
        assert_eq!(report.phases[&healthy_child], Phase::Ready);
        assert_eq!(report.phases[&child], Phase::Failed);
        // Root cause first, its consequence after
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].0, broken);
        assert_eq!(report.failures[1].0, child);
    }

    #[tokio::test]
    async fn rollback_destroys_ready_resources_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers =
            ProviderSet::uniform(Arc::new(recording_mock(log.clone(), Some("strimzi-operator"))));
        let (graph, [cluster, ns, _]) = chain_graph();

        let config = MaterializerConfig {
            teardown: TeardownPolicy::Rollback,
            ..no_retry()
        };
        let report = Materializer::new(providers, config)
            .materialize_report(&graph)
            .await
            .unwrap();

        assert_eq!(report.rolled_back, vec![ns, cluster]);
        assert!(report.outputs.is_empty());
        let log = log.lock().unwrap();
        assert_eq!(
            log[log.len() - 2..],
            ["delete Namespace/kafka", "delete ContainerCluster/demo"]
        );
    }

    #[tokio::test]
    async fn leave_in_place_keeps_ready_resources() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers =
            ProviderSet::uniform(Arc::new(recording_mock(log.clone(), Some("strimzi-operator"))));
        let (graph, [cluster, ns, _]) = chain_graph();

        let report = Materializer::new(providers, no_retry())
            .materialize_report(&graph)
            .await
            .unwrap();

        assert!(report.rolled_back.is_empty());
        assert!(report.outputs.contains_key(&cluster));
        assert!(report.outputs.contains_key(&ns));
        assert!(!log.lock().unwrap().iter().any(|l| l.starts_with("delete")));
    }

    #[tokio::test]
    async fn destroy_skips_read_only_kinds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers = ProviderSet::uniform(Arc::new(recording_mock(log.clone(), None)));

        let mut g = ResourceGraph::new();
        let ns = g
            .declare(ResourceKind::Namespace, "kafka", ResourceSpec::new(), &[])
            .unwrap();
        g.declare(
            ResourceKind::ServiceLookup,
            "kafka-bootstrap",
            ResourceSpec::new().field("namespace", ns.output("name")),
            &[],
        )
        .unwrap();

        let materializer = Materializer::new(providers, no_retry());
        let done = materializer.materialize(&g).await.unwrap();
        let destroyed = materializer.destroy(&g, &done).await.unwrap();

        assert_eq!(destroyed, vec![ns]);
        assert_eq!(
            log.lock().unwrap().last().map(String::as_str),
            Some("delete Namespace/kafka")
        );
    }
}
