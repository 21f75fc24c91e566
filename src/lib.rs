//! Stratum - dependency-ordered infrastructure materializer
//!
//! Stratum declares a managed Kubernetes cluster and the operators installed
//! into it as one graph of resources, then drives every resource through the
//! API that owns it once everything it depends on is ready.
//!
//! # Architecture
//!
//! - Resources are (kind, name, spec, dependencies); specs reference other
//!   resources' outputs, and every reference is also a dependency edge
//! - The materializer runs one task per resource; a task waits on the output
//!   cells of its dependencies, so independent subgraphs run concurrently
//! - Providers own the external calls: the cloud REST APIs, the cluster API
//!   server, and in-process values (passwords, kubeconfigs)
//!
//! # Modules
//!
//! - [`graph`] - Resource graph, kinds and desired specs
//! - [`output`] - Output attributes and deferred resolution
//! - [`materializer`] - Concurrent materialization, rollback and destroy
//! - [`provider`] - Cloud, cluster, local and simulated providers
//! - [`kubeconfig`] - Cluster credential composer
//! - [`identity`] - IAM and workload identity bindings
//! - [`installer`] - Operator installers (Berglas, Strimzi, Istio/Knative, Tekton)
//! - [`stack`] - Root composition and exported outputs
//! - [`config`] - Stack configuration
//! - [`state`] - Recorded outputs for later teardown
//! - [`retry`] - Bounded exponential backoff
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod identity;
pub mod installer;
pub mod kubeconfig;
pub mod materializer;
pub mod output;
pub mod provider;
pub mod retry;
pub mod stack;
pub mod state;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "stratum";

/// Default state file written by `stratum up`
pub const DEFAULT_STATE_FILE: &str = "stratum.state.json";
