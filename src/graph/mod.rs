//! Resource graph
//!
//! Every infrastructure object stratum manages is a node in a directed
//! acyclic graph. Edges point from a resource to the resources it depends on,
//! either declared explicitly or implied by output references in its spec.
//!
//! Nodes are stored in declaration order and addressed by [`ResourceHandle`],
//! which is just that position. Because a resource can only reference handles
//! that already exist, `declare` can never close a cycle; later edges added
//! through [`ResourceGraph::add_dependency`] are checked.

mod kind;
mod spec;

pub use kind::{ApiDomain, ResourceKind};
pub use spec::{FieldValue, OutputRef, ResourceSpec};

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::{Error, Result};

/// Position of a resource in its graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub(crate) usize);

impl ResourceHandle {
    /// Reference to one of this resource's outputs
    pub fn output(&self, attribute: impl Into<String>) -> OutputRef {
        OutputRef {
            resource: *self,
            attribute: attribute.into(),
        }
    }

    /// Declaration index
    pub fn index(&self) -> usize {
        self.0
    }
}

/// (kind, name) identity of a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource kind
    pub kind: ResourceKind,
    /// Name, unique within the kind
    pub name: String,
}

impl ResourceId {
    /// Create an id
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A declared resource
#[derive(Clone, Debug)]
pub struct Resource {
    /// Identity
    pub id: ResourceId,
    /// Desired spec
    pub spec: ResourceSpec,
    dependencies: BTreeSet<ResourceHandle>,
}

impl Resource {
    /// Resources that must be ready before this one
    pub fn dependencies(&self) -> &BTreeSet<ResourceHandle> {
        &self.dependencies
    }
}

/// Directed acyclic graph of declared resources
#[derive(Clone, Debug, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, ResourceHandle>,
}

impl ResourceGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource.
    ///
    /// Outputs referenced by `spec` are added to `deps` automatically.
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        spec: ResourceSpec,
        deps: &[ResourceHandle],
    ) -> Result<ResourceHandle> {
        let id = ResourceId::new(kind, name);
        if id.name.is_empty() {
            return Err(Error::validation(format!("{kind} declared with an empty name")));
        }
        if self.index.contains_key(&id) {
            return Err(Error::validation(format!("{id} is already declared")));
        }

        let mut dependencies: BTreeSet<ResourceHandle> = deps.iter().copied().collect();
        dependencies.extend(spec.refs().into_iter().map(|r| r.resource));
        if let Some(unknown) = dependencies.iter().find(|h| h.0 >= self.resources.len()) {
            return Err(Error::validation(format!(
                "{id} depends on undeclared resource #{}",
                unknown.0
            )));
        }

        let handle = ResourceHandle(self.resources.len());
        self.index.insert(id.clone(), handle);
        self.resources.push(Resource {
            id,
            spec,
            dependencies,
        });
        Ok(handle)
    }

    /// Make `from` depend on `to`.
    ///
    /// Fails with [`Error::Cycle`] if `to` already (transitively) depends on
    /// `from`, or if both are the same resource.
    pub fn add_dependency(&mut self, from: ResourceHandle, to: ResourceHandle) -> Result<()> {
        self.resource(from)?;
        self.resource(to)?;

        if from == to || self.depends_on(to, from) {
            return Err(Error::cycle(format!(
                "{} -> {} would close a cycle",
                self.resources[from.0].id, self.resources[to.0].id
            )));
        }
        self.resources[from.0].dependencies.insert(to);
        Ok(())
    }

    /// Whether `from` transitively depends on `target`
    pub fn depends_on(&self, from: ResourceHandle, target: ResourceHandle) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(h) = stack.pop() {
            if !seen.insert(h) {
                continue;
            }
            let Some(resource) = self.resources.get(h.0) else {
                continue;
            };
            for dep in &resource.dependencies {
                if *dep == target {
                    return true;
                }
                stack.push(*dep);
            }
        }
        false
    }

    /// Look up a resource by handle
    pub fn resource(&self, handle: ResourceHandle) -> Result<&Resource> {
        self.resources
            .get(handle.0)
            .ok_or_else(|| Error::validation(format!("unknown resource handle #{}", handle.0)))
    }

    /// Look up a handle by identity
    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<ResourceHandle> {
        self.index.get(&ResourceId::new(kind, name)).copied()
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, handle: ResourceHandle) -> Result<Vec<ResourceHandle>> {
        Ok(self.resource(handle)?.dependencies.iter().copied().collect())
    }

    /// Resources that directly depend on `handle`
    pub fn dependents(&self, handle: ResourceHandle) -> Vec<ResourceHandle> {
        self.handles()
            .filter(|h| self.resources[h.0].dependencies.contains(&handle))
            .collect()
    }

    /// All handles in declaration order
    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        (0..self.resources.len()).map(ResourceHandle)
    }

    /// Number of declared resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been declared
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Kahn's algorithm. Among resources that are ready at the same time the
    /// earlier declaration goes first, so the order is deterministic.
    pub fn topological_order(&self) -> Result<Vec<ResourceHandle>> {
        let n = self.resources.len();
        let mut remaining: Vec<usize> = self
            .resources
            .iter()
            .map(|r| r.dependencies.len())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, r) in self.resources.iter().enumerate() {
            for dep in &r.dependencies {
                dependents[dep.0].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = ready.pop_first() {
            order.push(ResourceHandle(i));
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<String> = (0..n)
                .filter(|&i| remaining[i] > 0)
                .map(|i| self.resources[i].id.to_string())
                .collect();
            return Err(Error::cycle(format!(
                "unresolvable dependencies among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Destruction order: dependents before the resources they depend on
    pub fn reverse_topological_order(&self) -> Result<Vec<ResourceHandle>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }
}
