//! Resource kinds and the API domain that owns each of them

use std::fmt;

use serde::{Deserialize, Serialize};

/// The external API responsible for materializing a kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiDomain {
    /// Cloud provider control plane
    Cloud,
    /// Kubernetes API server of the provisioned cluster
    Cluster,
    /// Computed in-process (random values, credential bundles)
    Local,
}

impl fmt::Display for ApiDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Cluster => write!(f, "cluster"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Kind of a declared resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Managed Kubernetes cluster
    ContainerCluster,
    /// Cloud IAM service account
    ServiceAccount,
    /// Project-level IAM role binding for one member
    ProjectIamBinding,
    /// IAM binding on a service account resource (workload identity)
    ServiceAccountIamBinding,
    /// Object storage bucket
    StorageBucket,
    /// Object uploaded into a bucket
    StorageObject,
    /// HTTP-triggered cloud function
    CloudFunction,
    /// IAM member on a cloud function
    FunctionIamMember,
    /// Kubernetes namespace
    Namespace,
    /// Kubernetes ServiceAccount
    KubeServiceAccount,
    /// Kubernetes ClusterRole
    ClusterRole,
    /// Kubernetes ClusterRoleBinding
    ClusterRoleBinding,
    /// Kubernetes Deployment
    Deployment,
    /// MutatingWebhookConfiguration
    MutatingWebhook,
    /// Multi-document manifest file applied verbatim
    ManifestFile,
    /// Instance of a custom resource
    CustomResource,
    /// Reads a field from an existing Service once it is populated
    ServiceLookup,
    /// Random string (passwords, name suffixes)
    RandomString,
    /// Kubeconfig credential bundle
    Kubeconfig,
}

impl ResourceKind {
    /// Every kind, in declaration order
    pub const ALL: [ResourceKind; 19] = [
        Self::ContainerCluster,
        Self::ServiceAccount,
        Self::ProjectIamBinding,
        Self::ServiceAccountIamBinding,
        Self::StorageBucket,
        Self::StorageObject,
        Self::CloudFunction,
        Self::FunctionIamMember,
        Self::Namespace,
        Self::KubeServiceAccount,
        Self::ClusterRole,
        Self::ClusterRoleBinding,
        Self::Deployment,
        Self::MutatingWebhook,
        Self::ManifestFile,
        Self::CustomResource,
        Self::ServiceLookup,
        Self::RandomString,
        Self::Kubeconfig,
    ];

    /// The API that owns this kind
    pub fn domain(&self) -> ApiDomain {
        match self {
            Self::ContainerCluster
            | Self::ServiceAccount
            | Self::ProjectIamBinding
            | Self::ServiceAccountIamBinding
            | Self::StorageBucket
            | Self::StorageObject
            | Self::CloudFunction
            | Self::FunctionIamMember => ApiDomain::Cloud,
            Self::Namespace
            | Self::KubeServiceAccount
            | Self::ClusterRole
            | Self::ClusterRoleBinding
            | Self::Deployment
            | Self::MutatingWebhook
            | Self::ManifestFile
            | Self::CustomResource
            | Self::ServiceLookup => ApiDomain::Cluster,
            Self::RandomString | Self::Kubeconfig => ApiDomain::Local,
        }
    }

    /// Kinds that only observe existing state and own nothing to delete
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ServiceLookup)
    }

    /// Stable name used in resource ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerCluster => "ContainerCluster",
            Self::ServiceAccount => "ServiceAccount",
            Self::ProjectIamBinding => "ProjectIamBinding",
            Self::ServiceAccountIamBinding => "ServiceAccountIamBinding",
            Self::StorageBucket => "StorageBucket",
            Self::StorageObject => "StorageObject",
            Self::CloudFunction => "CloudFunction",
            Self::FunctionIamMember => "FunctionIamMember",
            Self::Namespace => "Namespace",
            Self::KubeServiceAccount => "KubeServiceAccount",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Deployment => "Deployment",
            Self::MutatingWebhook => "MutatingWebhook",
            Self::ManifestFile => "ManifestFile",
            Self::CustomResource => "CustomResource",
            Self::ServiceLookup => "ServiceLookup",
            Self::RandomString => "RandomString",
            Self::Kubeconfig => "Kubeconfig",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
