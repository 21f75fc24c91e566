//! Cluster API provider
//!
//! Every cluster-side resource is applied with server-side apply through a
//! dynamic API resolved by discovery, so CRD-defined kinds need no generated
//! types. Clients are built from the kubeconfig carried in each spec and
//! cached per kubeconfig.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::{Client, Config};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{poll_until, ProviderRequest, ResourceProvider};
use crate::graph::ResourceKind;
use crate::output::OutputAttributes;
use crate::{Error, Result, FIELD_MANAGER};

const API: &str = "cluster";

/// Apply order for objects of a manifest file
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" => 7,
        "HorizontalPodAutoscaler" => 8,
        _ => 10,
    }
}

/// Split `apiVersion` into group and version
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Parse a multi-document YAML file into objects, dropping empty documents
pub fn split_documents(yaml: &str) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Identity of one object inside a manifest
#[derive(Clone, Debug)]
struct ObjectTarget {
    gvk: GroupVersionKind,
    api_version: String,
    name: String,
    namespace: Option<String>,
}

impl ObjectTarget {
    fn from_object(obj: &Value) -> Result<Self> {
        let field = |pointer| str_at(obj, pointer);
        let kind = field("/kind").ok_or_else(|| Error::validation("manifest is missing kind"))?;
        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::validation(format!("{kind} is missing apiVersion")))?;
        let name = field("/metadata/name")
            .ok_or_else(|| Error::validation(format!("{kind} is missing metadata.name")))?;
        let (group, version) = parse_api_version(api_version);

        Ok(Self {
            gvk: GroupVersionKind {
                group,
                version,
                kind: kind.to_string(),
            },
            api_version: api_version.to_string(),
            name: name.to_string(),
            namespace: field("/metadata/namespace").map(str::to_string),
        })
    }
}

fn str_at<'a>(obj: &'a Value, pointer: &str) -> Option<&'a str> {
    obj.pointer(pointer).and_then(Value::as_str)
}

/// A populated, non-empty value at `pointer`
fn lookup_field(obj: &Value, pointer: &str) -> Option<Value> {
    match obj.pointer(pointer)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(other.clone()),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Server-side apply provider for the provisioned cluster
pub struct KubeProvider {
    clients: DashMap<String, Client>,
    manifests_dir: PathBuf,
    poll_interval: Duration,
}

impl KubeProvider {
    /// Relative manifest paths resolve against `manifests_dir`
    pub fn new(manifests_dir: impl Into<PathBuf>) -> Self {
        Self {
            clients: DashMap::new(),
            manifests_dir: manifests_dir.into(),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Interval between service lookups
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn client(&self, request: &ProviderRequest) -> Result<Client> {
        let kubeconfig = request.str_field("kubeconfig")?;
        if let Some(client) = self.clients.get(kubeconfig) {
            return Ok(client.clone());
        }

        let parsed = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| Error::validation(format!("{}: invalid kubeconfig: {e}", request.id)))?;
        let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::config(format!("failed to load kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;
        self.clients.insert(kubeconfig.to_string(), client.clone());
        Ok(client)
    }

    fn manifest_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manifests_dir.join(path)
        }
    }

    async fn read_manifest(&self, request: &ProviderRequest) -> Result<Vec<Value>> {
        let path = self.manifest_path(request.str_field("path")?);
        let yaml = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::validation(format!("{}: cannot read {}: {e}", request.id, path.display()))
        })?;
        let mut docs = split_documents(&yaml)?;
        docs.sort_by_key(|d| kind_priority(d.get("kind").and_then(Value::as_str).unwrap_or("")));
        Ok(docs)
    }

    async fn apply_object(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let client = self.client(request).await?;
        let obj = request.require("manifest")?;
        let target = ObjectTarget::from_object(obj)?;

        let (resource, capabilities) = kube::discovery::pinned_kind(&client, &target.gvk)
            .await
            .map_err(|e| {
                let kind = format!("{}/{}", target.api_version, target.gvk.kind);
                Error::external_retryable(API, format!("unknown resource type {kind}: {e}"))
            })?;
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        let api = dynamic_api(&client, &resource, namespaced, target.namespace.as_deref());

        let applied = api
            .patch(&target.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
            .await?;
        info!(
            kind = %target.gvk.kind,
            name = %target.name,
            namespace = ?target.namespace,
            "applied"
        );

        let mut outputs = OutputAttributes::new()
            .with("name", target.name.clone())
            .with("kind", target.gvk.kind.clone())
            .with("apiVersion", target.api_version.clone());
        if let Some(ns) = &target.namespace {
            outputs.insert("namespace", ns.clone());
        }
        if let Some(uid) = applied.metadata.uid {
            outputs.insert("uid", uid);
        }
        Ok(outputs)
    }

    async fn delete_object(&self, request: &ProviderRequest) -> Result<()> {
        let client = self.client(request).await?;
        let target = ObjectTarget::from_object(request.require("manifest")?)?;

        let discovered = kube::discovery::pinned_kind(&client, &target.gvk).await;
        let (resource, capabilities) = match discovered {
            Ok(found) => found,
            Err(e) if is_not_found(&e) => {
                debug!(kind = %target.gvk.kind, "kind no longer served, nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        let api = dynamic_api(&client, &resource, namespaced, target.namespace.as_deref());
        delete_ignoring_missing(&api, &target.name).await
    }

    async fn apply_manifest_file(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let client = self.client(request).await?;
        let docs = self.read_manifest(request).await?;
        let default_ns = request.opt_str("namespace");
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let (foundational, rest): (Vec<&Value>, Vec<&Value>) = docs.iter().partition(|d| {
            matches!(
                d.get("kind").and_then(Value::as_str),
                Some("Namespace" | "CustomResourceDefinition")
            )
        });

        // CRDs must be served before objects of their kinds can be resolved,
        // so discovery runs again after the foundational phase.
        for phase in [foundational, rest] {
            if phase.is_empty() {
                continue;
            }
            let discovery = Discovery::new(client.clone()).run().await?;
            for obj in phase {
                let target = ObjectTarget::from_object(obj)?;
                let (resource, capabilities) = discovery.resolve_gvk(&target.gvk).ok_or_else(|| {
                    Error::external_retryable(
                        API,
                        format!("unknown resource type {}/{}", target.api_version, target.gvk.kind),
                    )
                })?;
                let namespaced = matches!(capabilities.scope, Scope::Namespaced);
                let ns = target.namespace.as_deref().or(default_ns);
                let api = dynamic_api(&client, &resource, namespaced, ns);

                let mut obj = obj.clone();
                if namespaced && target.namespace.is_none() {
                    if let (Some(ns), Some(meta)) = (ns, obj.get_mut("metadata")) {
                        meta["namespace"] = Value::String(ns.to_string());
                    }
                }
                api.patch(&target.name, &params, &Patch::Apply(&obj)).await?;
                debug!(
                    kind = %target.gvk.kind,
                    name = %target.name,
                    namespace = ?ns,
                    "applied manifest object"
                );
            }
        }

        info!(path = %request.str_field("path")?, objects = docs.len(), "applied manifest file");
        Ok(OutputAttributes::new()
            .with("path", request.str_field("path")?)
            .with("objects", docs.len() as u64))
    }

    async fn delete_manifest_file(&self, request: &ProviderRequest) -> Result<()> {
        let client = self.client(request).await?;
        let mut docs = self.read_manifest(request).await?;
        docs.reverse();
        let default_ns = request.opt_str("namespace");
        let discovery = Discovery::new(client.clone()).run().await?;

        for obj in &docs {
            let target = ObjectTarget::from_object(obj)?;
            let Some((resource, capabilities)) = discovery.resolve_gvk(&target.gvk) else {
                continue;
            };
            let namespaced = matches!(capabilities.scope, Scope::Namespaced);
            let ns = target.namespace.as_deref().or(default_ns);
            let api = dynamic_api(&client, &resource, namespaced, ns);
            delete_ignoring_missing(&api, &target.name).await?;
        }
        Ok(())
    }

    async fn lookup_service(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        let client = self.client(request).await?;
        let namespace = request.str_field("namespace")?;
        let service = request.str_field("service")?;
        let field = request.str_field("field")?;
        let timeout = Duration::from_secs(request.u64_or("timeoutSecs", 600)?);

        let api: Api<Service> = Api::namespaced(client, namespace);
        let what = format!("{namespace}/{service} {field}");
        let value = poll_until(API, &what, timeout, self.poll_interval, || async {
            match api.get_opt(service).await? {
                Some(svc) => Ok(lookup_field(&serde_json::to_value(&svc)?, field)),
                None => Ok(None),
            }
        })
        .await?;

        info!(service = %service, namespace = %namespace, field = %field, "service field resolved");
        Ok(OutputAttributes::new()
            .with("value", value)
            .with("name", service)
            .with("namespace", namespace))
    }
}

fn dynamic_api(
    client: &Client,
    resource: &ApiResource,
    namespaced: bool,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match (namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client.clone(), ns, resource),
        (true, None) => Api::default_namespaced_with(client.clone(), resource),
        (false, _) => Api::all_with(client.clone(), resource),
    }
}

async fn delete_ignoring_missing(api: &Api<DynamicObject>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!(name = %name, "deleted");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ResourceProvider for KubeProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        match request.kind() {
            ResourceKind::ManifestFile => self.apply_manifest_file(request).await,
            ResourceKind::ServiceLookup => self.lookup_service(request).await,
            ResourceKind::Namespace
            | ResourceKind::KubeServiceAccount
            | ResourceKind::ClusterRole
            | ResourceKind::ClusterRoleBinding
            | ResourceKind::Deployment
            | ResourceKind::MutatingWebhook
            | ResourceKind::CustomResource => self.apply_object(request).await,
            other => Err(Error::validation(format!(
                "{other} is not a cluster resource kind"
            ))),
        }
    }

    async fn delete(&self, request: &ProviderRequest, _outputs: &OutputAttributes) -> Result<()> {
        match request.kind() {
            ResourceKind::ManifestFile => self.delete_manifest_file(request).await,
            ResourceKind::ServiceLookup => Ok(()),
            _ => self.delete_object(request).await,
        }
    }
}
