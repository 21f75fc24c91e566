//! Provider abstraction
//!
//! A provider turns a resolved resource spec into a live object on the API
//! that owns its kind and returns the object's outputs. The materializer only
//! sees the [`ResourceProvider`] trait; [`ProviderSet`] routes each kind to
//! the provider for its [`ApiDomain`].
//!
//! # Providers
//!
//! - [`GcpProvider`] - cloud control plane over REST
//! - [`KubeProvider`] - cluster API server via kube-rs server-side apply
//! - [`LocalProvider`] - random values and kubeconfig composition in-process
//! - [`SimulatedProvider`] - fabricated outputs for dry runs and tests

mod cluster;
mod gcp;
mod local;
mod simulated;

pub use self::cluster::KubeProvider;
pub use self::gcp::{GcpConfig, GcpProvider};
pub use self::local::LocalProvider;
pub use self::simulated::{CallRecord, Operation, SimulatedProvider};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::trace;

use crate::graph::{ApiDomain, ResourceId, ResourceKind};
use crate::output::OutputAttributes;
use crate::{Error, Result};

/// A resource with every output reference substituted
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    /// Resource identity
    pub id: ResourceId,
    /// Resolved spec (always a JSON object)
    pub spec: Value,
}

impl ProviderRequest {
    /// Create a request
    pub fn new(id: ResourceId, spec: Value) -> Self {
        Self { id, spec }
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Field by name, if present and not null
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.spec.get(name).filter(|v| !v.is_null())
    }

    /// Required field
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.field(name)
            .ok_or_else(|| Error::validation(format!("{} is missing field '{}'", self.id, name)))
    }

    /// Required string field
    pub fn str_field(&self, name: &str) -> Result<&str> {
        self.require(name)?.as_str().ok_or_else(|| {
            Error::validation(format!("{} field '{}' must be a string", self.id, name))
        })
    }

    /// Optional string field
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Optional unsigned integer field with a default
    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64> {
        match self.field(name) {
            None => Ok(default),
            Some(v) => v.as_u64().ok_or_else(|| {
                Error::validation(format!(
                    "{} field '{}' must be an unsigned integer",
                    self.id, name
                ))
            }),
        }
    }

    /// Optional boolean field with a default
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.field(name).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// Poll `check` until it yields a value.
///
/// Retryable errors from `check` count as "not yet"; any other error ends the
/// wait. Fails with a non-retryable [`Error::ExternalApi`] after `timeout`.
pub(crate) async fn poll_until<T, F, Fut>(
    api: &str,
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => trace!(what = %what, "condition not met yet"),
            Err(e) if e.is_retryable() => trace!(what = %what, error = %e, "poll failed, retrying"),
            Err(e) => return Err(e),
        }
        if start.elapsed() >= timeout {
            return Err(Error::external(
                api,
                format!("timed out after {}s waiting for {}", timeout.as_secs(), what),
            ));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Creates and deletes resources on one external API.
///
/// Implementations must be safe for concurrent use: the materializer calls
/// them from many in-flight resource tasks at once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create (or adopt) the resource and return its outputs
    async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes>;

    /// Delete a resource previously created with the given outputs
    async fn delete(&self, request: &ProviderRequest, outputs: &OutputAttributes) -> Result<()>;
}

/// One provider per API domain
#[derive(Clone)]
pub struct ProviderSet {
    cloud: Arc<dyn ResourceProvider>,
    cluster: Arc<dyn ResourceProvider>,
    local: Arc<dyn ResourceProvider>,
}

impl ProviderSet {
    /// Route each domain to its own provider
    pub fn new(
        cloud: Arc<dyn ResourceProvider>,
        cluster: Arc<dyn ResourceProvider>,
        local: Arc<dyn ResourceProvider>,
    ) -> Self {
        Self {
            cloud,
            cluster,
            local,
        }
    }

    /// Route every domain to the same provider
    pub fn uniform(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            cloud: provider.clone(),
            cluster: provider.clone(),
            local: provider,
        }
    }

    /// Provider responsible for `kind`
    pub fn for_kind(&self, kind: ResourceKind) -> &Arc<dyn ResourceProvider> {
        match kind.domain() {
            ApiDomain::Cloud => &self.cloud,
            ApiDomain::Cluster => &self.cluster,
            ApiDomain::Local => &self.local,
        }
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet").finish_non_exhaustive()
    }
}
