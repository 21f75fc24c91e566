//! Identity binder
//!
//! Grants a cloud service account its project roles and lets a cluster
//! service account act as it through workload identity. Bindings are keyed
//! by (identity, role, member); asking for an existing binding returns the
//! resource already declared instead of declaring a second one.

use std::collections::HashMap;

use crate::graph::{FieldValue, ResourceGraph, ResourceHandle, ResourceKind, ResourceSpec};
use crate::Result;

/// Role that lets a cluster identity impersonate a cloud service account
pub const WORKLOAD_IDENTITY_USER: &str = "roles/iam.workloadIdentityUser";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BindingKey {
    identity: String,
    role: String,
    member: String,
}

/// Records declared for one external/cluster identity pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityBinding {
    /// Cloud service account
    pub external: ResourceHandle,
    /// Cluster service account
    pub cluster: ResourceHandle,
    /// One project-level binding per role, in role order
    pub roles: Vec<ResourceHandle>,
    /// The workload identity binding on the cloud service account
    pub workload_identity: ResourceHandle,
}

impl IdentityBinding {
    /// Every binding record
    pub fn records(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.roles.iter().copied().chain(std::iter::once(self.workload_identity))
    }
}

/// Declares IAM bindings for one project
#[derive(Debug, Clone)]
pub struct IdentityBinder {
    project: String,
    bindings: HashMap<BindingKey, ResourceHandle>,
}

impl IdentityBinder {
    /// Binder for `project`
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            bindings: HashMap::new(),
        }
    }

    /// Workload identity pool of the project
    pub fn identity_namespace(&self) -> String {
        format!("{}.svc.id.goog", self.project)
    }

    /// Number of distinct bindings declared
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing has been bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind the service account's email to each project role.
    ///
    /// Records are named `{name}-{role}` with the role's `roles/` prefix
    /// dropped, e.g. `berglas-storage-objectviewer`.
    pub fn bind_roles(
        &mut self,
        graph: &mut ResourceGraph,
        name: &str,
        external: ResourceHandle,
        roles: &[&str],
    ) -> Result<Vec<ResourceHandle>> {
        roles
            .iter()
            .map(|role| {
                let key = BindingKey {
                    identity: format!("projects/{}", self.project),
                    role: role.to_string(),
                    member: format!("serviceAccount:#{}.email", external.index()),
                };
                let spec = ResourceSpec::new()
                    .field("project", self.project.as_str())
                    .field("role", *role)
                    .field(
                        "member",
                        FieldValue::interpolate("serviceAccount:{0}", [external.output("email")]),
                    );
                self.declare_once(
                    graph,
                    key,
                    ResourceKind::ProjectIamBinding,
                    format!("{name}-{}", role_slug(role)),
                    spec,
                )
            })
            .collect()
    }

    /// Let the cluster service account act as the cloud service account
    pub fn bind_workload_identity(
        &mut self,
        graph: &mut ResourceGraph,
        name: &str,
        external: ResourceHandle,
        cluster: ResourceHandle,
    ) -> Result<ResourceHandle> {
        let key = BindingKey {
            identity: format!("serviceAccount#{}", external.index()),
            role: WORKLOAD_IDENTITY_USER.to_string(),
            member: format!("#{}.namespace/#{}.name", cluster.index(), cluster.index()),
        };
        let member = FieldValue::interpolate(
            format!("serviceAccount:{}[{{0}}/{{1}}]", self.identity_namespace()),
            [cluster.output("namespace"), cluster.output("name")],
        );
        let spec = ResourceSpec::new()
            .field("project", self.project.as_str())
            .field("serviceAccount", external.output("email"))
            .field("role", WORKLOAD_IDENTITY_USER)
            .field("member", member);
        let kind = ResourceKind::ServiceAccountIamBinding;
        self.declare_once(graph, key, kind, name.to_string(), spec)
    }

    /// Bind `external` to `roles` and to the cluster identity.
    ///
    /// Calling this again for the same pair declares nothing and returns the
    /// same records.
    pub fn bind_external_to_cluster(
        &mut self,
        graph: &mut ResourceGraph,
        name: &str,
        external: ResourceHandle,
        cluster: ResourceHandle,
        roles: &[&str],
    ) -> Result<IdentityBinding> {
        let roles = self.bind_roles(graph, name, external, roles)?;
        let workload_identity = self.bind_workload_identity(graph, name, external, cluster)?;
        Ok(IdentityBinding {
            external,
            cluster,
            roles,
            workload_identity,
        })
    }

    fn declare_once(
        &mut self,
        graph: &mut ResourceGraph,
        key: BindingKey,
        kind: ResourceKind,
        name: String,
        spec: ResourceSpec,
    ) -> Result<ResourceHandle> {
        if let Some(existing) = self.bindings.get(&key) {
            return Ok(*existing);
        }
        let handle = graph.declare(kind, name, spec, &[])?;
        self.bindings.insert(key, handle);
        Ok(handle)
    }
}

/// `roles/storage.objectViewer` -> `storage-objectviewer`
fn role_slug(role: &str) -> String {
    role.trim_start_matches("roles/")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
