//! Tekton operator
//!
//! The operator runs under its own service account with a cluster role
//! covering the objects it manages: pipelines, triggers and dashboard
//! components, their RBAC and webhooks, plus the workloads backing them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{metadata, object, InstallPlan, ManifestStep};
use crate::graph::{FieldValue, ResourceKind};

const READ_WRITE: &[&str] = &["get", "list", "create", "update", "delete", "patch", "watch"];
const MANAGE: &[&str] = &["get", "create", "update", "delete"];

/// Tekton install settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CicdConfig {
    /// Installer name, also used for the namespace and RBAC objects
    pub name: String,
    /// CRD manifests, relative to the manifests directory
    pub crds: Vec<String>,
    /// Operator image
    pub image: String,
}

impl Default for CicdConfig {
    fn default() -> Self {
        Self {
            name: "tekton".to_string(),
            crds: vec![
                "tekton-operator/crds/operator_v1alpha1_pipeline_crd.yaml".to_string(),
                "tekton-operator/crds/operator_v1alpha1_addon_crd.yaml".to_string(),
            ],
            image: "metral/tekton-operator:v0.13.0".to_string(),
        }
    }
}

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Value {
    json!({"apiGroups": api_groups, "resources": resources, "verbs": verbs})
}

/// RBAC rules the operator needs
pub fn operator_rules() -> Value {
    Value::Array(vec![
        rule(
            &[""],
            &[
                "pods",
                "services",
                "endpoints",
                "persistentvolumeclaims",
                "events",
                "configmaps",
                "secrets",
                "pods/log",
                "limitranges",
            ],
            &["*"],
        ),
        rule(
            &["extensions", "apps"],
            &["ingresses", "ingresses/status"],
            &["delete", "create", "patch", "get", "list", "update", "watch"],
        ),
        rule(&[""], &["namespaces"], READ_WRITE),
        rule(
            &["apps"],
            &[
                "deployments",
                "daemonsets",
                "replicasets",
                "statefulsets",
                "deployments/finalizers",
            ],
            &["*"],
        ),
        rule(&["monitoring.coreos.com"], &["servicemonitors"], &["get", "create", "delete"]),
        rule(&["rbac.authorization.k8s.io"], &["clusterroles", "roles"], MANAGE),
        rule(&[""], &["serviceaccounts"], READ_WRITE),
        rule(&["rbac.authorization.k8s.io"], &["clusterrolebindings", "rolebindings"], MANAGE),
        rule(
            &["apiextensions.k8s.io"],
            &["customresourcedefinitions", "customresourcedefinitions/status"],
            READ_WRITE,
        ),
        rule(
            &["admissionregistration.k8s.io"],
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            READ_WRITE,
        ),
        rule(
            &["build.knative.dev"],
            &["builds", "buildtemplates", "clusterbuildtemplates"],
            READ_WRITE,
        ),
        rule(&["extensions"], &["deployments"], READ_WRITE),
        rule(&["extensions"], &["deployments/finalizers"], READ_WRITE),
        rule(
            &["policy"],
            &["podsecuritypolicies"],
            &["get", "create", "update", "delete", "use"],
        ),
        rule(&["operator.tekton.dev"], &["*", "tektonaddons"], &["*"]),
        rule(&["tekton.dev", "triggers.tekton.dev"], &["*"], &["*"]),
        rule(&["dashboard.tekton.dev"], &["*", "tektonaddons"], &["*"]),
        rule(&["security.openshift.io"], &["securitycontextconstraints"], &["use"]),
        rule(&["route.openshift.io"], &["routes"], &["get", "list"]),
    ])
}

impl CicdConfig {
    fn deployment_spec(&self) -> Value {
        let from_pod_name = json!({"fieldRef": {"fieldPath": "metadata.name"}});
        json!({
            "replicas": 1,
            "selector": {"matchLabels": {"name": self.name}},
            "template": {
                "metadata": {"labels": {"name": self.name}},
                "spec": {
                    "serviceAccountName": self.name,
                    "containers": [{
                        "name": self.name,
                        "image": self.image,
                        "command": ["tekton-operator"],
                        "imagePullPolicy": "Always",
                        "env": [
                            {"name": "WATCH_NAMESPACE", "value": ""},
                            {"name": "POD_NAME", "valueFrom": from_pod_name},
                            {"name": "OPERATOR_NAME", "valueFrom": from_pod_name},
                        ],
                    }],
                },
            },
        })
    }

    /// Namespace, CRDs, service account, cluster role and binding, then the operator
    pub fn plan(&self) -> InstallPlan {
        let name = self.name.as_str();
        let in_namespace = || metadata(name, Some(name.into()));

        let crds = self
            .crds
            .iter()
            .enumerate()
            .map(|(i, path)| ManifestStep::File {
                name: format!("{name}-crds-{i}"),
                path: path.clone(),
            })
            .collect();

        let binding = json!({
            "subjects": [{"kind": "ServiceAccount", "name": name, "namespace": name}],
            "roleRef": {
                "kind": "ClusterRole",
                "name": name,
                "apiGroup": "rbac.authorization.k8s.io",
            },
        });

        let workloads = vec![
            ManifestStep::Object {
                kind: ResourceKind::KubeServiceAccount,
                name: name.to_string(),
                manifest: object("v1", "ServiceAccount", in_namespace(), []),
            },
            ManifestStep::Object {
                kind: ResourceKind::ClusterRole,
                name: name.to_string(),
                manifest: object(
                    "rbac.authorization.k8s.io/v1",
                    "ClusterRole",
                    metadata(name, None),
                    [("rules", FieldValue::from(operator_rules()))],
                ),
            },
            ManifestStep::Object {
                kind: ResourceKind::ClusterRoleBinding,
                name: name.to_string(),
                manifest: object(
                    "rbac.authorization.k8s.io/v1",
                    "ClusterRoleBinding",
                    metadata(name, None),
                    [
                        ("subjects", FieldValue::from(binding["subjects"].clone())),
                        ("roleRef", FieldValue::from(binding["roleRef"].clone())),
                    ],
                ),
            },
            ManifestStep::Object {
                kind: ResourceKind::Deployment,
                name: name.to_string(),
                manifest: object(
                    "apps/v1",
                    "Deployment",
                    in_namespace(),
                    [("spec", FieldValue::from(self.deployment_spec()))],
                ),
            },
        ];

        InstallPlan {
            name: name.to_string(),
            namespace: name.to_string(),
            crds,
            workloads,
            custom_resources: Vec::new(),
            endpoint: None,
        }
    }
}
