//! Simulated provider
//!
//! Fabricates deterministic outputs for every kind without touching any API
//! and records each call, so a whole stack can be planned offline and its
//! ordering asserted in tests. Failures can be injected per resource.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;

use super::{ProviderRequest, ResourceProvider};
use crate::graph::{ResourceId, ResourceKind};
use crate::kubeconfig::CredentialComposer;
use crate::output::OutputAttributes;
use crate::{Error, Result};

/// Provider operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// `create`
    Create,
    /// `delete`
    Delete,
}

/// One recorded provider call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    /// Operation invoked
    pub operation: Operation,
    /// Target resource
    pub id: ResourceId,
}

#[derive(Clone, Debug)]
struct InjectedFailure {
    message: String,
    retryable: bool,
    remaining: Option<u32>,
}

/// Deterministic provider that never leaves the process
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    calls: Mutex<Vec<CallRecord>>,
    failures: Mutex<HashMap<ResourceId, InjectedFailure>>,
}

impl SimulatedProvider {
    /// Provider with no injected failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create of `id` fail permanently
    pub fn fail_on(self, id: ResourceId, message: impl Into<String>) -> Self {
        self.inject(id, message.into(), false, None)
    }

    /// Make the first `times` creates of `id` fail with a retryable error
    pub fn fail_transiently(self, id: ResourceId, times: u32) -> Self {
        self.inject(id, "503 service unavailable".to_string(), true, Some(times))
    }

    fn inject(
        self,
        id: ResourceId,
        message: String,
        retryable: bool,
        remaining: Option<u32>,
    ) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(
                id,
                InjectedFailure {
                    message,
                    retryable,
                    remaining,
                },
            );
        }
        self
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Ids passed to `create`, in order
    pub fn created(&self) -> Vec<ResourceId> {
        self.ids(Operation::Create)
    }

    /// Ids passed to `delete`, in order
    pub fn deleted(&self) -> Vec<ResourceId> {
        self.ids(Operation::Delete)
    }

    fn ids(&self, operation: Operation) -> Vec<ResourceId> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.id)
            .collect()
    }

    fn record(&self, operation: Operation, id: &ResourceId) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(CallRecord {
                operation,
                id: id.clone(),
            });
        }
    }

    fn injected(&self, id: &ResourceId) -> Option<Error> {
        let mut failures = self.failures.lock().ok()?;
        let failure = failures.get_mut(id)?;
        match failure.remaining.as_mut() {
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(Error::external_retryable("simulated", failure.message.clone()))
            }
            None if failure.retryable => {
                Some(Error::external_retryable("simulated", failure.message.clone()))
            }
            None => Some(Error::external("simulated", failure.message.clone())),
        }
    }
}

/// Stable small number derived from a name
fn fingerprint(name: &str) -> u8 {
    let sum = name
        .bytes()
        .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    (sum % 200) as u8 + 10
}

fn manifest_identity(request: &ProviderRequest) -> OutputAttributes {
    let manifest = request.field("manifest").cloned().unwrap_or(Value::Null);
    let str_at = |p: &str| manifest.pointer(p).and_then(Value::as_str).map(str::to_string);
    let mut out = OutputAttributes::new().with(
        "name",
        str_at("/metadata/name").unwrap_or_else(|| request.name().to_string()),
    );
    if let Some(ns) = str_at("/metadata/namespace") {
        out.insert("namespace", ns);
    }
    if let Some(kind) = str_at("/kind") {
        out.insert("kind", kind);
    }
    if let Some(api_version) = str_at("/apiVersion") {
        out.insert("apiVersion", api_version);
    }
    out.insert("uid", format!("00000000-0000-0000-0000-{:012}", fingerprint(request.name())));
    out
}

fn fabricate(request: &ProviderRequest) -> Result<OutputAttributes> {
    let name = request.name();
    let n = fingerprint(name);
    let outputs = match request.kind() {
        ResourceKind::ContainerCluster => {
            let cluster = request.require("cluster")?;
            let cluster_name = cluster
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            let ca = base64::engine::general_purpose::STANDARD
                .encode(format!("simulated CA for {cluster_name}"));
            let mut out = OutputAttributes::new()
                .with("name", cluster_name)
                .with("endpoint", format!("203.0.113.{n}"))
                .with("clusterCaCertificate", ca)
                .with("location", request.opt_str("zone").unwrap_or("simulated"));
            if let Some(auth) = cluster.get("masterAuth") {
                out.insert("masterUsername", auth.get("username").cloned().unwrap_or(Value::Null));
                if let Some(password) = auth.get("password") {
                    out = out.with_secret("masterPassword", password.clone());
                }
            }
            out
        }
        ResourceKind::ServiceAccount => {
            let project = request.str_field("project")?;
            let account_id = request.str_field("accountId")?;
            let email = format!("{account_id}@{project}.iam.gserviceaccount.com");
            OutputAttributes::new()
                .with("accountId", account_id)
                .with("name", format!("projects/{project}/serviceAccounts/{email}"))
                .with("email", email)
        }
        ResourceKind::ProjectIamBinding
        | ResourceKind::ServiceAccountIamBinding
        | ResourceKind::FunctionIamMember => OutputAttributes::new()
            .with("role", request.str_field("role")?)
            .with("member", request.str_field("member")?),
        ResourceKind::StorageBucket => {
            let bucket = request.str_field("bucket")?;
            OutputAttributes::new()
                .with("name", bucket)
                .with("url", format!("gs://{bucket}"))
        }
        ResourceKind::StorageObject => {
            let bucket = request.str_field("bucket")?;
            let object = request.str_field("object")?;
            OutputAttributes::new()
                .with("name", object)
                .with("bucket", bucket)
                .with("gsUrl", format!("gs://{bucket}/{object}"))
        }
        ResourceKind::CloudFunction => {
            let project = request.str_field("project")?;
            let region = request.str_field("region")?;
            let function = request.str_field("function")?;
            OutputAttributes::new()
                .with("name", function)
                .with("region", region)
                .with(
                    "httpsTriggerUrl",
                    format!("https://{region}-{project}.cloudfunctions.net/{function}"),
                )
        }
        ResourceKind::ManifestFile => OutputAttributes::new()
            .with("path", request.str_field("path")?)
            .with("objects", 0u64),
        ResourceKind::ServiceLookup => OutputAttributes::new()
            .with("value", format!("10.96.{}.{}", n % 16, n))
            .with("name", request.str_field("service")?)
            .with("namespace", request.str_field("namespace")?),
        ResourceKind::RandomString => {
            let length = request.u64_or("length", 16)? as usize;
            let alphabet = b"abcdefghijklmnopqrstuvwxyz";
            let result: String = name
                .bytes()
                .cycle()
                .take(length)
                .enumerate()
                .map(|(i, b)| alphabet[(b as usize + i) % alphabet.len()] as char)
                .collect();
            if request.bool_or("secret", false) {
                OutputAttributes::new().with_secret("result", result)
            } else {
                OutputAttributes::new().with("result", result)
            }
        }
        ResourceKind::Kubeconfig => {
            let composer =
                CredentialComposer::new(request.str_field("project")?, request.str_field("zone")?);
            let bundle = composer.compose(
                request.str_field("clusterName")?,
                request.str_field("endpoint")?,
                request.str_field("clusterCaCertificate")?,
            )?;
            OutputAttributes::new()
                .with("context", bundle.context)
                .with_secret("kubeconfig", bundle.kubeconfig)
        }
        ResourceKind::Namespace
        | ResourceKind::KubeServiceAccount
        | ResourceKind::ClusterRole
        | ResourceKind::ClusterRoleBinding
        | ResourceKind::Deployment
        | ResourceKind::MutatingWebhook
        | ResourceKind::CustomResource => manifest_identity(request),
    };
    Ok(outputs)
}

#[async_trait]
impl ResourceProvider for SimulatedProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        self.record(Operation::Create, &request.id);
        if let Some(err) = self.injected(&request.id) {
            return Err(err);
        }
        fabricate(request)
    }

    async fn delete(&self, request: &ProviderRequest, _outputs: &OutputAttributes) -> Result<()> {
        self.record(Operation::Delete, &request.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cluster_spec(name: &str) -> Value {
        json!({
            "cluster": {
                "name": name,
                "masterAuth": {"username": "example-user", "password": "pw"}
            }
        })
    }

    fn req(kind: ResourceKind, name: &str, spec: Value) -> ProviderRequest {
        ProviderRequest::new(ResourceId::new(kind, name), spec)
    }

    #[tokio::test]
    async fn outputs_are_deterministic() {
        let provider = SimulatedProvider::new();
        let r = req(ResourceKind::ContainerCluster, "demo", cluster_spec("demo"));
        let a = provider.create(&r).await.unwrap();
        let b = provider.create(&r).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get_str("name"), Some("demo"));
        assert!(a.is_secret("masterPassword"));
        assert_eq!(provider.created().len(), 2);
    }

    #[tokio::test]
    async fn service_account_email_follows_project() {
        let provider = SimulatedProvider::new();
        let out = provider
            .create(&req(
                ResourceKind::ServiceAccount,
                "berglas-sa",
                json!({"project": "acme", "accountId": "berglas-abcdefg"}),
            ))
            .await
            .unwrap();
        assert_eq!(out.get_str("email"), Some("berglas-abcdefg@acme.iam.gserviceaccount.com"));
    }

    #[tokio::test]
    async fn cluster_objects_echo_manifest_identity() {
        let provider = SimulatedProvider::new();
        let out = provider
            .create(&req(
                ResourceKind::KubeServiceAccount,
                "berglas",
                json!({"manifest": {
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": {"name": "berglas", "namespace": "apps"}
                }}),
            ))
            .await
            .unwrap();
        assert_eq!(out.get_str("name"), Some("berglas"));
        assert_eq!(out.get_str("namespace"), Some("apps"));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retryable() {
        let id = ResourceId::new(ResourceKind::Namespace, "kafka");
        let provider = SimulatedProvider::new().fail_on(id.clone(), "namespace quota exceeded");
        let err = provider
            .create(&req(ResourceKind::Namespace, "kafka", json!({})))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn transient_failures_clear_after_n_attempts() {
        let id = ResourceId::new(ResourceKind::StorageBucket, "berglas");
        let provider = SimulatedProvider::new().fail_transiently(id, 2);
        let r = req(ResourceKind::StorageBucket, "berglas", json!({"bucket": "berglas-x"}));

        assert!(provider.create(&r).await.unwrap_err().is_retryable());
        assert!(provider.create(&r).await.unwrap_err().is_retryable());
        assert_eq!(provider.create(&r).await.unwrap().get_str("url"), Some("gs://berglas-x"));
    }

    #[tokio::test]
    async fn random_strings_respect_length() {
        let provider = SimulatedProvider::new();
        let out = provider
            .create(&req(
                ResourceKind::RandomString,
                "berglasAccountIdSuffix",
                json!({"length": 7}),
            ))
            .await
            .unwrap();
        let s = out.get_str("result").unwrap();
        assert_eq!(s.len(), 7);
        assert!(s.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn deletes_are_recorded() {
        let provider = SimulatedProvider::new();
        let r = req(ResourceKind::Namespace, "apps", json!({}));
        provider.delete(&r, &OutputAttributes::new()).await.unwrap();
        assert_eq!(
            provider.calls(),
            vec![CallRecord {
                operation: Operation::Delete,
                id: ResourceId::new(ResourceKind::Namespace, "apps"),
            }]
        );
    }
}
