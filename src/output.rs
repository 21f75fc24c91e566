//! Output attributes and deferred resolution
//!
//! Each resource owns one watch cell. Consumers either read a cell directly
//! (failing with [`Error::DependencyUnresolved`] when the producer is not
//! ready) or await it, suspending until the producer is ready or failed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::graph::{OutputRef, ResourceGraph, ResourceHandle};
use crate::{Error, Result};

/// Placeholder shown instead of secret values
pub const REDACTED: &str = "[secret]";

/// Named values a resource publishes once it is ready
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputAttributes {
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    secrets: BTreeSet<String>,
}

impl OutputAttributes {
    /// No outputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain attribute (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add an attribute that must never be logged
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        self.secrets.insert(name.clone());
        self.values.insert(name, value.into());
        self
    }

    /// Insert a plain attribute
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Attribute by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Attribute as a string slice
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Whether the attribute was published as secret
    pub fn is_secret(&self, name: &str) -> bool {
        self.secrets.contains(name)
    }

    /// Attribute names in order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no attributes were published
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object with secret values replaced by [`REDACTED`]
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| {
                    let v = if self.secrets.contains(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        v.clone()
                    };
                    (k.clone(), v)
                })
                .collect(),
        )
    }
}

impl fmt::Debug for OutputAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputAttributes({})", self.redacted())
    }
}

/// Lifecycle phase of a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Declared, waiting for dependencies
    Pending,
    /// Submitted to its API
    Materializing,
    /// Outputs available
    Ready,
    /// Will never become ready
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Materializing => "materializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Current state of one resource
#[derive(Clone, Debug)]
pub enum ResourceState {
    /// Waiting for dependencies
    Pending,
    /// Submitted to its API
    Materializing,
    /// Outputs published
    Ready(Arc<OutputAttributes>),
    /// Failed with the given reason
    Failed(String),
}

impl ResourceState {
    /// Phase without payload
    pub fn phase(&self) -> Phase {
        match self {
            Self::Pending => Phase::Pending,
            Self::Materializing => Phase::Materializing,
            Self::Ready(_) => Phase::Ready,
            Self::Failed(_) => Phase::Failed,
        }
    }

    fn is_settled(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

/// One watch cell per resource of a graph
#[derive(Debug)]
pub struct OutputStore {
    names: Vec<String>,
    cells: Vec<watch::Sender<ResourceState>>,
}

impl OutputStore {
    /// Cells for every resource in `graph`, all pending
    pub fn for_graph(graph: &ResourceGraph) -> Self {
        let names = graph
            .handles()
            .filter_map(|h| graph.resource(h).ok().map(|r| r.id.to_string()))
            .collect::<Vec<_>>();
        let cells = names
            .iter()
            .map(|_| watch::Sender::new(ResourceState::Pending))
            .collect();
        Self { names, cells }
    }

    fn cell(&self, handle: ResourceHandle) -> Result<&watch::Sender<ResourceState>> {
        self.cells.get(handle.index()).ok_or_else(|| {
            Error::validation(format!("unknown resource handle #{}", handle.index()))
        })
    }

    fn name(&self, handle: ResourceHandle) -> &str {
        self.names
            .get(handle.index())
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Replace the state of a resource, waking every waiter
    pub fn set(&self, handle: ResourceHandle, state: ResourceState) -> Result<()> {
        self.cell(handle)?.send_replace(state);
        Ok(())
    }

    /// Snapshot of a resource's state
    pub fn state(&self, handle: ResourceHandle) -> Result<ResourceState> {
        Ok(self.cell(handle)?.borrow().clone())
    }

    /// Read an output without waiting.
    ///
    /// Fails with [`Error::DependencyUnresolved`] unless the producer is
    /// ready and published the attribute.
    pub fn get(&self, output: &OutputRef) -> Result<Value> {
        let state = self.cell(output.resource)?.borrow();
        match &*state {
            ResourceState::Ready(attrs) => attrs
                .get(&output.attribute)
                .cloned()
                .ok_or_else(|| Error::unresolved(self.name(output.resource), &output.attribute)),
            _ => Err(Error::unresolved(
                self.name(output.resource),
                &output.attribute,
            )),
        }
    }

    /// Suspend until the resource is ready; fails if it failed instead
    pub async fn wait_ready(&self, handle: ResourceHandle) -> Result<Arc<OutputAttributes>> {
        let mut rx = self.cell(handle)?.subscribe();
        let state = rx
            .wait_for(ResourceState::is_settled)
            .await
            .map_err(|_| Error::cancelled(format!("{} was dropped", self.name(handle))))?
            .clone();
        match state {
            ResourceState::Ready(attrs) => Ok(attrs),
            ResourceState::Failed(reason) => Err(Error::cancelled(format!(
                "dependency {} failed: {}",
                self.name(handle),
                reason
            ))),
            _ => unreachable!("wait_for only returns settled states"),
        }
    }

    /// Await an output, suspending until its producer settles
    pub async fn resolve(&self, output: &OutputRef) -> Result<Value> {
        self.wait_ready(output.resource).await?;
        self.get(output)
    }

    /// Outputs of every ready resource
    pub fn ready_outputs(&self) -> BTreeMap<ResourceHandle, Arc<OutputAttributes>> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| match &*cell.borrow() {
                ResourceState::Ready(attrs) => Some((ResourceHandle(i), attrs.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResourceKind, ResourceSpec};
    use std::time::Duration;

    fn two_node_store() -> (OutputStore, ResourceHandle, ResourceHandle) {
        let mut g = ResourceGraph::new();
        let cluster = g
            .declare(ResourceKind::ContainerCluster, "demo", ResourceSpec::new(), &[])
            .unwrap();
        let kc = g
            .declare(ResourceKind::Kubeconfig, "demo", ResourceSpec::new(), &[cluster])
            .unwrap();
        (OutputStore::for_graph(&g), cluster, kc)
    }

    #[test]
    fn reading_before_ready_is_unresolved() {
        let (store, cluster, _) = two_node_store();
        let err = store.get(&cluster.output("endpoint")).unwrap_err();
        assert!(matches!(err, Error::DependencyUnresolved { .. }));
        assert!(err.to_string().contains("ContainerCluster/demo"));
    }

    #[test]
    fn missing_attribute_on_ready_resource_is_unresolved() {
        let (store, cluster, _) = two_node_store();
        store
            .set(
                cluster,
                ResourceState::Ready(Arc::new(OutputAttributes::new().with("name", "demo"))),
            )
            .unwrap();
        assert_eq!(store.get(&cluster.output("name")).unwrap(), "demo");
        assert!(store.get(&cluster.output("endpoint")).is_err());
    }

    #[tokio::test]
    async fn waiters_wake_when_producer_becomes_ready() {
        let (store, cluster, _) = two_node_store();
        let store = Arc::new(store);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.resolve(&cluster.output("endpoint")).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        store
            .set(
                cluster,
                ResourceState::Ready(Arc::new(
                    OutputAttributes::new().with("endpoint", "1.2.3.4"),
                )),
            )
            .unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), "1.2.3.4");
    }

    #[tokio::test]
    async fn waiters_fail_when_producer_fails() {
        let (store, cluster, _) = two_node_store();
        store
            .set(cluster, ResourceState::Failed("quota exceeded".into()))
            .unwrap();
        let err = store.wait_ready(cluster).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn secrets_are_redacted_in_debug_and_listing() {
        let attrs = OutputAttributes::new()
            .with("username", "example-user")
            .with_secret("password", "hunter2hunter2");
        assert!(attrs.is_secret("password"));
        assert_eq!(attrs.get_str("password"), Some("hunter2hunter2"));

        let debug = format!("{attrs:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains(REDACTED));
        assert_eq!(attrs.redacted()["username"], "example-user");
    }

    #[test]
    fn ready_outputs_skips_unsettled_resources() {
        let (store, cluster, kc) = two_node_store();
        store
            .set(cluster, ResourceState::Ready(Arc::new(OutputAttributes::new())))
            .unwrap();
        store.set(kc, ResourceState::Materializing).unwrap();
        let ready = store.ready_outputs();
        assert_eq!(ready.len(), 1);
        assert!(ready.contains_key(&cluster));
        assert_eq!(store.state(kc).unwrap().phase(), Phase::Materializing);
    }
}
