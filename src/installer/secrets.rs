//! Berglas secrets webhook
//!
//! Pods in the apps namespace get Berglas injected by a mutating webhook. The
//! webhook handler runs as an HTTP cloud function; pods reach Secret Manager
//! through a cluster service account bound to a cloud service account with
//! workload identity.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{metadata, object, InstallChain, InstallContext, Installed};
use crate::graph::{FieldValue, ResourceHandle, ResourceKind, ResourceSpec};
use crate::Result;

/// Annotation linking a cluster service account to a cloud one
pub const GCP_SERVICE_ACCOUNT_ANNOTATION: &str = "iam.gke.io/gcp-service-account";

/// Berglas install settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecretsConfig {
    /// Installer name; prefixes every resource
    pub name: String,
    /// Project roles granted to the cloud service account
    pub roles: Vec<String>,
    /// Display name of the cloud service account
    pub display_name: String,
    /// Length of the random account id suffix
    pub suffix_length: u32,
    /// Cloud function region
    pub region: String,
    /// Source bucket location
    pub bucket_location: String,
    /// Webhook source archive, relative to the source directory
    pub source_archive: String,
    /// Function runtime
    pub runtime: String,
    /// Function entry point
    pub entry_point: String,
    /// Function memory in MB
    pub memory_mb: u32,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            name: "berglas".to_string(),
            roles: vec!["roles/secretmanager.secretAccessor".to_string()],
            display_name: "Kubernetes Berglas".to_string(),
            suffix_length: 7,
            region: "us-central1".to_string(),
            bucket_location: "US".to_string(),
            source_archive: "berglas-webhook.zip".to_string(),
            runtime: "go111".to_string(),
            entry_point: "F".to_string(),
            memory_mb: 128,
        }
    }
}

/// Declare the Berglas service accounts, function and webhook
pub fn install(ctx: &mut InstallContext<'_>, config: &SecretsConfig) -> Result<Installed> {
    let name = config.name.as_str();
    let project = ctx.project.clone();
    let apps_namespace = ctx.apps_namespace.clone();
    let mut chain = InstallChain::new(ctx, &[]);

    // Cloud identity with access to Secret Manager
    let suffix = chain.step(
        ResourceKind::RandomString,
        format!("{name}AccountIdSuffix"),
        ResourceSpec::new()
            .field("length", config.suffix_length)
            .field("special", false)
            .field("upper", false),
    )?;
    let gsa = chain.step(
        ResourceKind::ServiceAccount,
        format!("{name}-sa"),
        ResourceSpec::new()
            .field("project", project.as_str())
            .field(
                "accountId",
                FieldValue::interpolate(format!("{name}-{{0}}"), [suffix.output("result")]),
            )
            .field("displayName", config.display_name.as_str()),
    )?;
    let roles: Vec<&str> = config.roles.iter().map(String::as_str).collect();
    let ctx = chain.context();
    let role_bindings = ctx.binder.bind_roles(ctx.graph, name, gsa, &roles)?;
    chain.advance(role_bindings);

    // Cluster identity that acts as the cloud one
    let ksa = chain.object(
        ResourceKind::KubeServiceAccount,
        name,
        object(
            "v1",
            "ServiceAccount",
            annotated(name, Some(apps_namespace.clone().into()), &gsa),
            [],
        ),
    )?;
    let ctx = chain.context();
    let workload_identity = ctx.binder.bind_workload_identity(ctx.graph, name, gsa, ksa)?;
    chain.advance([workload_identity]);

    // Webhook handler
    let bucket = chain.step(
        ResourceKind::StorageBucket,
        name,
        ResourceSpec::new()
            .field("project", project.as_str())
            .field(
                "bucket",
                FieldValue::interpolate(
                    format!("{project}-{name}-{{0}}"),
                    [suffix.output("result")],
                ),
            )
            .field("location", config.bucket_location.as_str()),
    )?;
    let archive = chain.step(
        ResourceKind::StorageObject,
        format!("{name}-source"),
        ResourceSpec::new()
            .field("bucket", bucket.output("name"))
            .field("object", config.source_archive.as_str())
            .field("source", config.source_archive.as_str())
            .field("contentType", "application/zip"),
    )?;
    let function = chain.step(
        ResourceKind::CloudFunction,
        name,
        ResourceSpec::new()
            .field("project", project.as_str())
            .field("region", config.region.as_str())
            .field("function", name)
            .field("runtime", config.runtime.as_str())
            .field("entryPoint", config.entry_point.as_str())
            .field("availableMemoryMb", config.memory_mb)
            .field("sourceArchiveUrl", archive.output("gsUrl"))
            .field("triggerHttp", true),
    )?;
    chain.step(
        ResourceKind::FunctionIamMember,
        format!("{name}-gcpfunc"),
        ResourceSpec::new()
            .field("project", project.as_str())
            .field("region", function.output("region"))
            .field("function", function.output("name"))
            .field("role", "roles/cloudfunctions.invoker")
            .field("member", "allUsers"),
    )?;

    let endpoint = FieldValue::from(function.output("httpsTriggerUrl"));
    let webhook = FieldValue::object([
        ("admissionReviewVersions", FieldValue::from(json!(["v1beta1"]))),
        ("name", format!("{name}-webhook.cloud.google.com").into()),
        ("clientConfig", FieldValue::object([("url", endpoint.clone())])),
        (
            "rules",
            json!([{
                "operations": ["CREATE"],
                "apiGroups": [""],
                "apiVersions": ["v1"],
                "resources": ["pods"],
                "scope": "Namespaced",
            }])
            .into(),
        ),
        ("sideEffects", "None".into()),
    ]);
    chain.object(
        ResourceKind::MutatingWebhook,
        name,
        object(
            "admissionregistration.k8s.io/v1",
            "MutatingWebhookConfiguration",
            annotated(name, None, &gsa),
            [("webhooks", FieldValue::List(vec![webhook]))],
        ),
    )?;

    Ok(Installed {
        name: name.to_string(),
        namespace: apps_namespace.into(),
        endpoint: Some(endpoint.clone()),
        resources: chain.into_steps(),
        exports: vec![
            ("berglasWebhookEndpoint".to_string(), endpoint),
            ("k8sBerglasServiceAccountName".to_string(), ksa.output("name").into()),
        ],
    })
}

/// Metadata carrying the cloud service account annotation
fn annotated(name: &str, namespace: Option<FieldValue>, gsa: &ResourceHandle) -> FieldValue {
    let mut meta = metadata(name, namespace);
    if let FieldValue::Object(fields) = &mut meta {
        fields.insert(
            "annotations".to_string(),
            FieldValue::object([(GCP_SERVICE_ACCOUNT_ANNOTATION, gsa.output("email"))]),
        );
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{OutputRef, ResourceGraph};
    use crate::installer::tests::fixture;
    use serde_json::Value;

    fn installed() -> (ResourceGraph, Installed) {
        let (mut graph, mut binder, kubeconfig, apps) = fixture();
        let mut ctx = InstallContext {
            graph: &mut graph,
            binder: &mut binder,
            kubeconfig,
            project: "acme".to_string(),
            apps_namespace: apps,
        };
        let installed = install(&mut ctx, &SecretsConfig::default()).unwrap();
        (graph, installed)
    }

    fn fake_outputs(r: &OutputRef) -> crate::Result<Value> {
        Ok(match r.attribute.as_str() {
            "result" => json!("x7k2p9q"),
            "email" => json!("berglas-x7k2p9q@acme.iam.gserviceaccount.com"),
            "httpsTriggerUrl" => json!("https://us-central1-acme.cloudfunctions.net/berglas"),
            "gsUrl" => json!("gs://acme-berglas-x7k2p9q/berglas-webhook.zip"),
            other => json!(other),
        })
    }

    fn spec_of(graph: &ResourceGraph, kind: ResourceKind, name: &str) -> (ResourceHandle, Value) {
        let handle = graph.find(kind, name).unwrap();
        let spec = graph.resource(handle).unwrap().spec.resolve(&fake_outputs).unwrap();
        (handle, spec)
    }

    #[test]
    fn account_id_uses_random_suffix() {
        let (graph, _) = installed();
        let (_, suffix) = spec_of(&graph, ResourceKind::RandomString, "berglasAccountIdSuffix");
        assert_eq!(suffix["length"], 7);
        assert_eq!(suffix["upper"], false);
        assert_eq!(suffix["special"], false);

        let (_, gsa) = spec_of(&graph, ResourceKind::ServiceAccount, "berglas-sa");
        assert_eq!(gsa["accountId"], "berglas-x7k2p9q");
        assert_eq!(gsa["displayName"], "Kubernetes Berglas");
    }

    #[test]
    fn cluster_account_is_annotated_and_bound() {
        let (graph, installed) = installed();
        let (ksa, spec) = spec_of(&graph, ResourceKind::KubeServiceAccount, "berglas");
        assert_eq!(
            spec["manifest"]["metadata"]["annotations"][GCP_SERVICE_ACCOUNT_ANNOTATION],
            "berglas-x7k2p9q@acme.iam.gserviceaccount.com"
        );

        let (binding, spec) = spec_of(&graph, ResourceKind::ServiceAccountIamBinding, "berglas");
        assert_eq!(spec["role"], "roles/iam.workloadIdentityUser");
        assert!(graph.dependencies(binding).unwrap().contains(&ksa));
        assert!(installed.resources.contains(&binding));
    }

    #[test]
    fn webhook_points_at_the_function() {
        let (graph, installed) = installed();
        let function = graph.find(ResourceKind::CloudFunction, "berglas").unwrap();
        let (webhook, spec) = spec_of(&graph, ResourceKind::MutatingWebhook, "berglas");

        let hook = &spec["manifest"]["webhooks"][0];
        assert_eq!(hook["name"], "berglas-webhook.cloud.google.com");
        assert_eq!(
            hook["clientConfig"]["url"],
            "https://us-central1-acme.cloudfunctions.net/berglas"
        );
        assert_eq!(hook["rules"][0]["operations"][0], "CREATE");
        assert!(graph.depends_on(webhook, function));
        assert_eq!(installed.last(), Some(webhook));
    }

    #[test]
    fn function_is_public_and_built_from_the_archive() {
        let (graph, _) = installed();
        let (_, function) = spec_of(&graph, ResourceKind::CloudFunction, "berglas");
        assert_eq!(function["runtime"], "go111");
        assert_eq!(function["entryPoint"], "F");
        assert_eq!(function["availableMemoryMb"], 128);
        assert_eq!(function["sourceArchiveUrl"], "gs://acme-berglas-x7k2p9q/berglas-webhook.zip");

        let (_, invoker) = spec_of(&graph, ResourceKind::FunctionIamMember, "berglas-gcpfunc");
        assert_eq!(invoker["member"], "allUsers");
        assert_eq!(invoker["role"], "roles/cloudfunctions.invoker");
    }

    #[test]
    fn exports_endpoint_and_account_name() {
        let (_, installed) = installed();
        let keys: Vec<_> = installed.exports.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["berglasWebhookEndpoint", "k8sBerglasServiceAccountName"]);
    }
}
