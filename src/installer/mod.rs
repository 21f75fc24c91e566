//! Operator installers
//!
//! Every operator is installed the same way: ensure its namespace, apply its
//! CRDs, apply the operator workload (manifest files or inline objects),
//! create its custom resources and optionally look up an endpoint the cluster
//! assigns at runtime. Each step depends on the one before it, so a failure
//! stops everything after it.
//!
//! - **Secrets**: Berglas webhook as a cloud function plus a mutating webhook
//! - **Streaming**: Strimzi operator and a Kafka cluster
//! - **Mesh**: Istio, then the Knative operator with serving and eventing
//! - **Cicd**: Tekton operator

pub mod cicd;
pub mod mesh;
pub mod secrets;
pub mod streaming;

pub use cicd::CicdConfig;
pub use mesh::MeshConfig;
pub use secrets::SecretsConfig;
pub use streaming::StreamingConfig;

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use crate::graph::{
    FieldValue, OutputRef, ResourceGraph, ResourceHandle, ResourceKind, ResourceSpec,
};
use crate::identity::IdentityBinder;
use crate::{Error, Result};

/// Graph and shared inputs every installer declares into
pub struct InstallContext<'a> {
    /// Graph being built
    pub graph: &'a mut ResourceGraph,
    /// IAM bindings shared across installers
    pub binder: &'a mut IdentityBinder,
    /// Kubeconfig output used to reach the cluster
    pub kubeconfig: OutputRef,
    /// Cloud project
    pub project: String,
    /// Name output of the namespace applications run in
    pub apps_namespace: OutputRef,
}

/// A manifest applied as part of an install
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestStep {
    /// Multi-document YAML file, relative to the manifests directory
    File {
        /// Resource name
        name: String,
        /// File path
        path: String,
    },
    /// Single object built in code
    Object {
        /// Resource kind
        kind: ResourceKind,
        /// Resource name
        name: String,
        /// Full object
        manifest: FieldValue,
    },
}

/// Custom resource created once the operator is running
#[derive(Clone, Debug, PartialEq)]
pub struct CustomResourcePlan {
    /// Resource name
    pub name: String,
    /// Full object
    pub manifest: FieldValue,
}

/// Service whose field is read back once the cluster fills it in
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceRef {
    /// Service with a fixed name
    Named(String),
    /// `{name of the first custom resource}{suffix}`
    FromCustomResource {
        /// Appended to the custom resource's name
        suffix: String,
    },
}

/// Endpoint published by an install
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointLookup {
    /// Resource name
    pub name: String,
    /// Namespace of the service
    pub namespace: String,
    /// Which service
    pub service: ServiceRef,
    /// JSON pointer into the service object
    pub field: String,
    /// How long to wait for the field
    pub timeout_secs: Option<u64>,
}

/// Everything one generic install declares
#[derive(Clone, Debug, PartialEq)]
pub struct InstallPlan {
    /// Installer name
    pub name: String,
    /// Namespace ensured first
    pub namespace: String,
    /// CRD manifests
    pub crds: Vec<ManifestStep>,
    /// Operator manifests and inline objects
    pub workloads: Vec<ManifestStep>,
    /// Custom resources, created after the workloads
    pub custom_resources: Vec<CustomResourcePlan>,
    /// Optional endpoint lookup
    pub endpoint: Option<EndpointLookup>,
}

/// Result of an install
#[derive(Clone, Debug, PartialEq)]
pub struct Installed {
    /// Installer name
    pub name: String,
    /// Namespace name
    pub namespace: FieldValue,
    /// Runtime-discovered endpoint
    pub endpoint: Option<FieldValue>,
    /// Declared resources, in step order
    pub resources: Vec<ResourceHandle>,
    /// Named values the stack exports
    pub exports: Vec<(String, FieldValue)>,
}

impl Installed {
    /// Final step of the install
    pub fn last(&self) -> Option<ResourceHandle> {
        self.resources.last().copied()
    }

    fn export(mut self, key: &str, value: FieldValue) -> Self {
        self.exports.push((key.to_string(), value));
        self
    }
}

/// One of the operators stratum installs
#[derive(Clone, Debug, PartialEq)]
pub enum Installer {
    /// Berglas secrets webhook
    Secrets(SecretsConfig),
    /// Strimzi Kafka operator
    Streaming(StreamingConfig),
    /// Istio and Knative
    Mesh(MeshConfig),
    /// Tekton operator
    Cicd(CicdConfig),
}

impl Installer {
    /// Installer name
    pub fn name(&self) -> &str {
        match self {
            Self::Secrets(c) => &c.name,
            Self::Streaming(c) => &c.name,
            Self::Mesh(_) => "mesh",
            Self::Cicd(c) => &c.name,
        }
    }

    /// Declare this operator's resources
    pub fn install(&self, ctx: &mut InstallContext<'_>) -> Result<Installed> {
        debug!(installer = %self.name(), "declaring operator install");
        match self {
            Self::Secrets(config) => secrets::install(ctx, config),
            Self::Streaming(config) => {
                let installed = install(ctx, &config.plan(), &[])?;
                let endpoint = installed
                    .endpoint
                    .clone()
                    .ok_or_else(|| Error::validation("streaming install has no bootstrap lookup"))?;
                Ok(installed.export("kafkaEndpoint", endpoint))
            }
            Self::Mesh(config) => mesh::install(ctx, config),
            Self::Cicd(config) => install(ctx, &config.plan(), &[]),
        }
    }
}

/// Declares resources so each waits for the one before it
pub struct InstallChain<'c, 'a> {
    ctx: &'c mut InstallContext<'a>,
    last: Vec<ResourceHandle>,
    steps: Vec<ResourceHandle>,
}

impl<'c, 'a> InstallChain<'c, 'a> {
    /// Start a chain whose first step waits for `after`
    pub fn new(ctx: &'c mut InstallContext<'a>, after: &[ResourceHandle]) -> Self {
        Self {
            ctx,
            last: after.to_vec(),
            steps: Vec::new(),
        }
    }

    /// Shared install inputs
    pub fn context(&mut self) -> &mut InstallContext<'a> {
        self.ctx
    }

    /// Declare the next step
    pub fn step(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        spec: ResourceSpec,
    ) -> Result<ResourceHandle> {
        let handle = self.ctx.graph.declare(kind, name, spec, &self.last)?;
        self.advance([handle]);
        Ok(handle)
    }

    /// Treat resources declared elsewhere as the latest steps
    pub fn advance(&mut self, handles: impl IntoIterator<Item = ResourceHandle>) {
        let handles: Vec<_> = handles.into_iter().collect();
        if handles.is_empty() {
            return;
        }
        self.steps.extend(&handles);
        self.last = handles;
    }

    /// Apply a single cluster object
    pub fn object(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        manifest: FieldValue,
    ) -> Result<ResourceHandle> {
        let spec = ResourceSpec::new()
            .field("kubeconfig", self.ctx.kubeconfig.clone())
            .field("manifest", manifest);
        self.step(kind, name, spec)
    }

    /// Apply a manifest file
    pub fn manifest_file(
        &mut self,
        name: impl Into<String>,
        path: &str,
        namespace: Option<&str>,
    ) -> Result<ResourceHandle> {
        let spec = ResourceSpec::new()
            .field("kubeconfig", self.ctx.kubeconfig.clone())
            .field("path", path)
            .field_opt("namespace", namespace);
        self.step(ResourceKind::ManifestFile, name, spec)
    }

    /// Wait for a service field and publish it as `value`
    pub fn service_lookup(
        &mut self,
        name: impl Into<String>,
        namespace: impl Into<FieldValue>,
        service: impl Into<FieldValue>,
        field: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ResourceHandle> {
        let spec = ResourceSpec::new()
            .field("kubeconfig", self.ctx.kubeconfig.clone())
            .field("namespace", namespace)
            .field("service", service)
            .field("field", field)
            .field_opt("timeoutSecs", timeout_secs.map(|t| FieldValue::from(json!(t))));
        self.step(ResourceKind::ServiceLookup, name, spec)
    }

    fn apply(&mut self, step: &ManifestStep, namespace: &str) -> Result<ResourceHandle> {
        match step {
            ManifestStep::File { name, path } => {
                self.manifest_file(name.as_str(), path, Some(namespace))
            }
            ManifestStep::Object {
                kind,
                name,
                manifest,
            } => self.object(*kind, name.as_str(), manifest.clone()),
        }
    }

    /// Steps declared so far
    pub fn into_steps(self) -> Vec<ResourceHandle> {
        self.steps
    }
}

/// Run a generic install plan
pub fn install(
    ctx: &mut InstallContext<'_>,
    plan: &InstallPlan,
    after: &[ResourceHandle],
) -> Result<Installed> {
    let mut chain = InstallChain::new(ctx, after);

    let namespace = chain.object(
        ResourceKind::Namespace,
        plan.namespace.as_str(),
        namespace_manifest(&plan.namespace),
    )?;
    for step in plan.crds.iter().chain(&plan.workloads) {
        chain.apply(step, &plan.namespace)?;
    }

    let mut custom = Vec::with_capacity(plan.custom_resources.len());
    for cr in &plan.custom_resources {
        let manifest = cr.manifest.clone();
        custom.push(chain.object(ResourceKind::CustomResource, cr.name.as_str(), manifest)?);
    }

    let endpoint = match &plan.endpoint {
        Some(lookup) => {
            let service = match &lookup.service {
                ServiceRef::Named(name) => FieldValue::from(name.as_str()),
                ServiceRef::FromCustomResource { suffix } => {
                    let cr = custom.first().ok_or_else(|| {
                        Error::validation(format!(
                            "{} endpoint names a custom resource but declares none",
                            plan.name
                        ))
                    })?;
                    FieldValue::interpolate(format!("{{0}}{suffix}"), [cr.output("name")])
                }
            };
            let handle = chain.service_lookup(
                lookup.name.as_str(),
                lookup.namespace.as_str(),
                service,
                &lookup.field,
                lookup.timeout_secs,
            )?;
            Some(FieldValue::from(handle.output("value")))
        }
        None => None,
    };

    Ok(Installed {
        name: plan.name.clone(),
        namespace: namespace.output("name").into(),
        endpoint,
        resources: chain.into_steps(),
        exports: Vec::new(),
    })
}

/// Object with `apiVersion`, `kind` and `metadata`, plus extra top-level fields
pub fn object<'k>(
    api_version: &str,
    kind: &str,
    metadata: FieldValue,
    body: impl IntoIterator<Item = (&'k str, FieldValue)>,
) -> FieldValue {
    let mut fields: BTreeMap<String, FieldValue> = body
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    fields.insert("apiVersion".to_string(), api_version.into());
    fields.insert("kind".to_string(), kind.into());
    fields.insert("metadata".to_string(), metadata);
    FieldValue::Object(fields)
}

/// `metadata` with a name and an optional namespace
pub fn metadata(name: impl Into<FieldValue>, namespace: Option<FieldValue>) -> FieldValue {
    let mut fields = BTreeMap::from([("name".to_string(), name.into())]);
    if let Some(ns) = namespace {
        fields.insert("namespace".to_string(), ns);
    }
    FieldValue::Object(fields)
}

/// A bare namespace object
pub fn namespace_manifest(name: &str) -> FieldValue {
    object("v1", "Namespace", metadata(name, None), [])
}
