//! Root composition
//!
//! Declares the whole stack into one graph: a generated control plane
//! password, the managed cluster, its kubeconfig, the apps namespace and then
//! every enabled operator. The exported values are what `stratum up` prints.

use std::cell::Cell;
use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::info;

use crate::config::StackConfig;
use crate::graph::{
    FieldValue, OutputRef, ResourceGraph, ResourceHandle, ResourceKind, ResourceSpec,
};
use crate::identity::IdentityBinder;
use crate::installer::{namespace_manifest, InstallContext, Installed};
use crate::materializer::Materialization;
use crate::output::REDACTED;
use crate::{Error, Result};

/// A declared stack
#[derive(Debug)]
pub struct Stack {
    graph: ResourceGraph,
    binder: IdentityBinder,
    password: ResourceHandle,
    cluster: ResourceHandle,
    kubeconfig: ResourceHandle,
    apps_namespace: ResourceHandle,
    installed: Vec<Installed>,
    exports: Vec<(String, FieldValue)>,
}

/// Managed cluster request body
fn cluster_body(config: &StackConfig, password: &ResourceHandle) -> FieldValue {
    let cluster = &config.cluster;
    let node_config = json!({
        "machineType": cluster.machine_type,
        "oauthScopes": cluster.oauth_scopes,
        "labels": cluster.labels,
        "tags": cluster.tags,
        // Pods see the workload identity metadata server instead of the node's
        "workloadMetadataConfig": {"mode": "GKE_METADATA"},
    });

    let mut body = BTreeMap::from([
        ("name".to_string(), FieldValue::from(cluster.name.as_str())),
        ("initialNodeCount".to_string(), cluster.initial_node_count.into()),
        ("nodeConfig".to_string(), node_config.into()),
        (
            "masterAuth".to_string(),
            FieldValue::object([
                ("username", FieldValue::from(cluster.master_username.as_str())),
                ("password", password.output("result").into()),
            ]),
        ),
        (
            "workloadIdentityConfig".to_string(),
            json!({"workloadPool": format!("{}.svc.id.goog", config.project)}).into(),
        ),
    ]);
    if let Some(version) = &cluster.min_master_version {
        body.insert("initialClusterVersion".to_string(), version.as_str().into());
    }
    FieldValue::Object(body)
}

impl Stack {
    /// Declare every resource of the stack
    pub fn declare(config: &StackConfig) -> Result<Self> {
        config.validate()?;
        let mut graph = ResourceGraph::new();
        let mut binder = IdentityBinder::new(config.project.as_str());
        let name = config.cluster.name.as_str();

        let password = graph.declare(
            ResourceKind::RandomString,
            format!("{name}-password"),
            ResourceSpec::new()
                .field("length", config.cluster.password_length)
                .field("secret", true),
            &[],
        )?;
        let cluster = graph.declare(
            ResourceKind::ContainerCluster,
            name,
            ResourceSpec::new()
                .field("project", config.project.as_str())
                .field("zone", config.zone.as_str())
                .field("cluster", cluster_body(config, &password)),
            &[],
        )?;
        let kubeconfig = graph.declare(
            ResourceKind::Kubeconfig,
            name,
            ResourceSpec::new()
                .field("project", config.project.as_str())
                .field("zone", config.zone.as_str())
                .field("clusterName", cluster.output("name"))
                .field("endpoint", cluster.output("endpoint"))
                .field("clusterCaCertificate", cluster.output("clusterCaCertificate")),
            &[],
        )?;
        let apps_namespace = graph.declare(
            ResourceKind::Namespace,
            config.apps_namespace(),
            ResourceSpec::new()
                .field("kubeconfig", kubeconfig.output("kubeconfig"))
                .field("manifest", namespace_manifest(config.apps_namespace())),
            &[],
        )?;

        let mut exports = vec![
            ("clusterName".to_string(), cluster.output("name").into()),
            ("kubeconfig".to_string(), kubeconfig.output("kubeconfig").into()),
            ("appsNamespaceName".to_string(), apps_namespace.output("name").into()),
        ];

        let mut installed = Vec::new();
        for installer in config.installers() {
            let mut ctx = InstallContext {
                graph: &mut graph,
                binder: &mut binder,
                kubeconfig: kubeconfig.output("kubeconfig"),
                project: config.project.clone(),
                apps_namespace: apps_namespace.output("name"),
            };
            let result = installer.install(&mut ctx)?;
            exports.extend(result.exports.iter().cloned());
            installed.push(result);
        }

        info!(
            resources = graph.len(),
            operators = installed.len(),
            "stack declared"
        );
        Ok(Self {
            graph,
            binder,
            password,
            cluster,
            kubeconfig,
            apps_namespace,
            installed,
            exports,
        })
    }

    /// The declared graph
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Generated control plane password
    pub fn password(&self) -> ResourceHandle {
        self.password
    }

    /// Managed cluster
    pub fn cluster(&self) -> ResourceHandle {
        self.cluster
    }

    /// Cluster credential bundle
    pub fn kubeconfig(&self) -> ResourceHandle {
        self.kubeconfig
    }

    /// Apps namespace
    pub fn apps_namespace(&self) -> ResourceHandle {
        self.apps_namespace
    }

    /// Installed operators, in install order
    pub fn installed(&self) -> &[Installed] {
        &self.installed
    }

    /// Number of IAM bindings declared
    pub fn binding_count(&self) -> usize {
        self.binder.len()
    }

    /// Exported values, in declaration order
    pub fn exports(&self) -> &[(String, FieldValue)] {
        &self.exports
    }
}

/// Exported values read from a materialization
#[derive(Clone, Default, PartialEq)]
pub struct StackOutputs {
    values: BTreeMap<String, Value>,
    secret: BTreeMap<String, bool>,
}

impl StackOutputs {
    /// Resolve every export of `stack` against `result`.
    ///
    /// An export derived from any secret attribute is secret itself.
    pub fn collect(stack: &Stack, result: &Materialization) -> Result<Self> {
        let mut outputs = Self::default();
        for (key, value) in stack.exports() {
            let tainted = Cell::new(false);
            let lookup = |r: &OutputRef| -> Result<Value> {
                let attrs = result.get(r.resource).ok_or_else(|| {
                    Error::unresolved(resource_label(stack.graph(), r.resource), &r.attribute)
                })?;
                if attrs.is_secret(&r.attribute) {
                    tainted.set(true);
                }
                attrs.get(&r.attribute).cloned().ok_or_else(|| {
                    Error::unresolved(resource_label(stack.graph(), r.resource), &r.attribute)
                })
            };
            let resolved = value.resolve(&lookup)?;
            outputs.values.insert(key.clone(), resolved);
            outputs.secret.insert(key.clone(), tainted.get());
        }
        Ok(outputs)
    }

    /// Exported value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Exported string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Whether an export carries secret material
    pub fn is_secret(&self, key: &str) -> bool {
        self.secret.get(key).copied().unwrap_or(false)
    }

    /// Export names
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// JSON object of every export, secrets replaced by a placeholder
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| {
                    let v = if self.is_secret(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        v.clone()
                    };
                    (k.clone(), v)
                })
                .collect(),
        )
    }

    /// JSON object of every export, secrets included
    pub fn revealed(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }
}

impl std::fmt::Debug for StackOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StackOutputs({})", self.redacted())
    }
}

fn resource_label(graph: &ResourceGraph, handle: ResourceHandle) -> String {
    graph
        .resource(handle)
        .map(|r| r.id.to_string())
        .unwrap_or_else(|_| format!("#{}", handle.index()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputAttributes;
    use std::sync::Arc;

    fn config() -> StackConfig {
        StackConfig::new("acme-prod", "us-west1-a")
    }

    #[test]
    fn declares_a_valid_graph_with_every_operator() {
        let stack = Stack::declare(&config()).unwrap();
        let order = stack.graph().topological_order().unwrap();
        assert_eq!(order.len(), stack.graph().len());
        assert_eq!(stack.installed().len(), 4);
        // Project binding plus workload identity for Berglas
        assert_eq!(stack.binding_count(), 2);
    }

    #[test]
    fn cluster_comes_before_namespace_before_operators() {
        let stack = Stack::declare(&config()).unwrap();
        let graph = stack.graph();
        assert!(graph.depends_on(stack.kubeconfig(), stack.cluster()));
        assert!(graph.depends_on(stack.cluster(), stack.password()));
        assert!(graph.depends_on(stack.apps_namespace(), stack.cluster()));

        let kafka = graph.find(ResourceKind::CustomResource, "kafka-cluster").unwrap();
        let kafka_ns = graph.find(ResourceKind::Namespace, "kafka").unwrap();
        assert!(graph.depends_on(kafka, kafka_ns));
        assert!(graph.depends_on(kafka_ns, stack.cluster()));
    }

    #[test]
    fn cluster_body_enables_workload_identity() {
        let stack = Stack::declare(&config()).unwrap();
        let cluster = stack.graph().resource(stack.cluster()).unwrap();
        let spec = cluster
            .spec
            .resolve(&|_: &OutputRef| -> Result<Value> { Ok(json!("pw")) })
            .unwrap();
        let body = &spec["cluster"];
        assert_eq!(body["workloadIdentityConfig"]["workloadPool"], "acme-prod.svc.id.goog");
        assert_eq!(body["nodeConfig"]["workloadMetadataConfig"]["mode"], "GKE_METADATA");
        assert_eq!(body["masterAuth"]["password"], "pw");
        assert_eq!(body["initialNodeCount"], 3);
        assert!(body.get("initialClusterVersion").is_none());
    }

    #[test]
    fn exports_follow_enabled_operators() {
        let mut config = config();
        config.operators.mesh = None;
        config.operators.secrets = None;
        let stack = Stack::declare(&config).unwrap();
        let keys: Vec<_> = stack.exports().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["clusterName", "kubeconfig", "appsNamespaceName", "kafkaEndpoint"]);
    }

    #[test]
    fn invalid_config_declares_nothing() {
        let config = StackConfig::new("x", "us-west1-a");
        assert!(matches!(Stack::declare(&config), Err(Error::Config(_))));
    }

    #[test]
    fn collect_marks_secret_exports() {
        let mut config = config();
        config.operators = crate::config::OperatorsConfig {
            secrets: None,
            streaming: None,
            mesh: None,
            cicd: None,
        };
        let stack = Stack::declare(&config).unwrap();

        let outputs = BTreeMap::from([
            (
                stack.cluster(),
                Arc::new(OutputAttributes::new().with("name", "stratum")),
            ),
            (
                stack.kubeconfig(),
                Arc::new(OutputAttributes::new().with_secret("kubeconfig", "apiVersion: v1")),
            ),
            (
                stack.apps_namespace(),
                Arc::new(OutputAttributes::new().with("name", "apps")),
            ),
        ]);
        let recorded = Materialization::from_outputs(outputs);
        let collected = StackOutputs::collect(&stack, &recorded).unwrap();

        assert_eq!(collected.get_str("clusterName"), Some("stratum"));
        assert!(collected.is_secret("kubeconfig"));
        assert!(!collected.is_secret("appsNamespaceName"));
        assert_eq!(collected.redacted()["kubeconfig"], REDACTED);
        assert_eq!(collected.revealed()["kubeconfig"], "apiVersion: v1");
        assert!(!format!("{collected:?}").contains("apiVersion"));
    }

    #[test]
    fn collect_fails_for_missing_outputs() {
        let stack = Stack::declare(&config()).unwrap();
        let err = StackOutputs::collect(&stack, &Materialization::default()).unwrap_err();
        assert!(matches!(err, Error::DependencyUnresolved { .. }));
    }
}
