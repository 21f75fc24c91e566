//! Error types for stratum
//!
//! Errors carry enough context (resource, API, field) to tell an operator
//! which part of the graph failed and whether trying again can help.

use thiserror::Error;

/// Main error type for graph declaration and materialization
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A resource spec or configuration field is malformed
    #[error("validation error: {0}")]
    Validation(String),

    /// An output was read before the resource producing it reached `ready`
    #[error("dependency unresolved: {resource} has no ready output '{attribute}'")]
    DependencyUnresolved {
        /// Resource that owns the output
        resource: String,
        /// Attribute that was requested
        attribute: String,
    },

    /// The cloud provider or cluster API rejected a request
    #[error("{api} API error: {message}")]
    ExternalApi {
        /// Which API rejected the request (cloud, cluster, local)
        api: String,
        /// Description of the failure
        message: String,
        /// Whether the same request may succeed later
        retryable: bool,
    },

    /// Adding an edge would make the dependency graph cyclic
    #[error("dependency cycle: {0}")]
    Cycle(String),

    /// A resource failed to materialize
    #[error("failed to materialize {resource}: {cause}")]
    Materialization {
        /// Resource that failed
        resource: String,
        /// Underlying failure
        #[source]
        cause: Box<Error>,
    },

    /// Materialization was cancelled before the resource could run
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Stack configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cycle error with the given message
    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::Cycle(msg.into())
    }

    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cancellation error with the given message
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a dependency-unresolved error
    pub fn unresolved(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::DependencyUnresolved {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Create an external API error that will not be retried
    pub fn external(api: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExternalApi {
            api: api.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an external API error that the materializer may retry
    pub fn external_retryable(api: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExternalApi {
            api: api.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Wrap a failure with the resource it occurred on
    pub fn materialization(resource: impl Into<String>, cause: Error) -> Self {
        Self::Materialization {
            resource: resource.into(),
            cause: Box::new(cause),
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalApi { retryable, .. } => *retryable,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 429 || resp.code >= 500,
            Self::Kube(
                kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_),
            ) => true,
            Self::Materialization { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a malformed spec field is rejected before anything is submitted
    #[test]
    fn story_validation_errors_describe_the_field() {
        let err = Error::validation("spec.initialNodeCount must be at least 1");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("initialNodeCount"));
        assert!(!err.is_retryable());
    }

    /// Story: throttling from the cloud API is retried, a 400 is not
    #[test]
    fn story_external_api_errors_classify_retryability() {
        let throttled = Error::external_retryable("cloud", "429 Too Many Requests");
        assert!(throttled.is_retryable());
        assert!(throttled.to_string().contains("cloud API error"));

        let rejected = Error::external("cloud", "400 invalid machine type");
        assert!(!rejected.is_retryable());
    }

    /// Story: the root composition sees which resource broke and why
    #[test]
    fn story_materialization_error_keeps_resource_and_cause() {
        let err = Error::materialization(
            "ManifestFile/strimzi-operator",
            Error::external("cluster", "unknown resource type kafka.strimzi.io/v1beta1/Kafka"),
        );
        let msg = err.to_string();
        assert!(msg.contains("ManifestFile/strimzi-operator"));
        assert!(msg.contains("unknown resource type"));

        match err {
            Error::Materialization { resource, cause } => {
                assert_eq!(resource, "ManifestFile/strimzi-operator");
                assert!(matches!(*cause, Error::ExternalApi { .. }));
            }
            _ => panic!("Expected Materialization variant"),
        }
    }

    #[test]
    fn retryability_follows_wrapped_cause() {
        let err = Error::materialization(
            "ContainerCluster/demo",
            Error::external_retryable("cloud", "503"),
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn only_transport_kube_errors_are_retryable() {
        let dropped = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(Error::Kube(kube::Error::ReadEvents(dropped)).is_retryable());

        let malformed = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(!Error::Kube(kube::Error::SerdeError(malformed)).is_retryable());
        assert!(!Error::Kube(kube::Error::TlsRequired).is_retryable());
    }

    #[test]
    fn unresolved_names_resource_and_attribute() {
        let err = Error::unresolved("ContainerCluster/demo", "endpoint");
        assert_eq!(
            err.to_string(),
            "dependency unresolved: ContainerCluster/demo has no ready output 'endpoint'"
        );
    }
}
