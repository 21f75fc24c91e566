//! Cluster credential composer
//!
//! Builds the kubeconfig used to reach a freshly provisioned cluster. The
//! bundle embeds the cluster CA and delegates authentication to the `gcloud`
//! auth provider, so it contains no long-lived user credentials.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kubeconfig document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    pub api_version: String,
    /// Clusters
    pub clusters: Vec<NamedCluster>,
    /// Contexts
    pub contexts: Vec<NamedContext>,
    /// Current context
    pub current_context: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Preferences (always empty)
    pub preferences: Preferences,
    /// Users
    pub users: Vec<NamedUser>,
}

/// Empty preferences block
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {}

/// Cluster entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Cluster config
    pub cluster: ClusterEntry,
    /// Entry name
    pub name: String,
}

/// Cluster connection details
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    /// Base64 CA bundle
    pub certificate_authority_data: String,
    /// API server URL
    pub server: String,
}

/// Context entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Context config
    pub context: ContextEntry,
    /// Entry name
    pub name: String,
}

/// Cluster/user pairing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Cluster entry name
    pub cluster: String,
    /// User entry name
    pub user: String,
}

/// User entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    /// Entry name
    pub name: String,
    /// User config
    pub user: UserEntry,
}

/// User authentication
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    /// Auth provider plugin
    pub auth_provider: AuthProvider,
}

/// `gcp` auth provider that shells out to gcloud for tokens
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthProvider {
    /// Provider settings
    pub config: AuthProviderConfig,
    /// Provider name
    pub name: String,
}

/// Settings for the gcloud config helper
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthProviderConfig {
    /// Arguments passed to `cmd-path`
    pub cmd_args: String,
    /// Command producing credentials
    pub cmd_path: String,
    /// JSONPath to the token expiry
    pub expiry_key: String,
    /// JSONPath to the access token
    pub token_key: String,
}

impl AuthProvider {
    fn gcloud() -> Self {
        Self {
            name: "gcp".to_string(),
            config: AuthProviderConfig {
                cmd_args: "config config-helper --format=json".to_string(),
                cmd_path: "gcloud".to_string(),
                expiry_key: "{.credential.token_expiry}".to_string(),
                token_key: "{.credential.access_token}".to_string(),
            },
        }
    }
}

/// Serialized kubeconfig plus the context it selects
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    /// Context, cluster and user name
    pub context: String,
    /// Kubeconfig YAML
    pub kubeconfig: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("context", &self.context)
            .field("kubeconfig", &crate::output::REDACTED)
            .finish()
    }
}

/// Composes kubeconfig bundles for clusters in one project and zone
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialComposer {
    project: String,
    zone: String,
}

impl CredentialComposer {
    /// Composer for clusters in `project`/`zone`
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
        }
    }

    /// Context name for a cluster
    pub fn context_name(&self, cluster_name: &str) -> String {
        format!("{}_{}_{}", self.project, self.zone, cluster_name)
    }

    /// Build the kubeconfig document.
    ///
    /// Pure: identical inputs always produce identical output.
    pub fn kubeconfig(
        &self,
        cluster_name: &str,
        endpoint: &str,
        ca_data: &str,
    ) -> Result<Kubeconfig> {
        if cluster_name.is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }
        if endpoint.trim().is_empty() {
            return Err(Error::validation(format!("cluster {cluster_name} has no endpoint")));
        }
        base64::engine::general_purpose::STANDARD
            .decode(ca_data)
            .map_err(|e| {
                Error::validation(format!(
                    "cluster {cluster_name} CA certificate is not valid base64: {e}"
                ))
            })?;

        let context = self.context_name(cluster_name);
        Ok(Kubeconfig {
            api_version: "v1".to_string(),
            clusters: vec![NamedCluster {
                name: context.clone(),
                cluster: ClusterEntry {
                    certificate_authority_data: ca_data.to_string(),
                    server: format!("https://{endpoint}"),
                },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: ContextEntry {
                    cluster: context.clone(),
                    user: context.clone(),
                },
            }],
            current_context: context.clone(),
            kind: "Config".to_string(),
            preferences: Preferences::default(),
            users: vec![NamedUser {
                name: context,
                user: UserEntry {
                    auth_provider: AuthProvider::gcloud(),
                },
            }],
        })
    }

    /// Compose the serialized credential bundle
    pub fn compose(
        &self,
        cluster_name: &str,
        endpoint: &str,
        ca_data: &str,
    ) -> Result<CredentialBundle> {
        let kubeconfig = self.kubeconfig(cluster_name, endpoint, ca_data)?;
        Ok(CredentialBundle {
            context: kubeconfig.current_context.clone(),
            kubeconfig: serde_yaml::to_string(&kubeconfig)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer() -> CredentialComposer {
        CredentialComposer::new("acme-prod", "us-west1-a")
    }

    #[test]
    fn compose_embeds_server_and_ca() {
        let bundle = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        assert!(bundle.kubeconfig.contains("server: https://1.2.3.4"));
        assert!(bundle.kubeconfig.contains("certificate-authority-data: QUJD"));
        assert_eq!(bundle.context, "acme-prod_us-west1-a_demo");
    }

    #[test]
    fn compose_is_byte_stable() {
        let a = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        let b = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        assert_eq!(a.kubeconfig, b.kubeconfig);
    }

    #[test]
    fn user_authenticates_through_gcloud() {
        let bundle = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        let parsed: Kubeconfig = serde_yaml::from_str(&bundle.kubeconfig).unwrap();
        let provider = &parsed.users[0].user.auth_provider;
        assert_eq!(provider.name, "gcp");
        assert_eq!(provider.config.cmd_path, "gcloud");
        assert_eq!(provider.config.cmd_args, "config config-helper --format=json");
        assert_eq!(provider.config.token_key, "{.credential.access_token}");
        assert_eq!(provider.config.expiry_key, "{.credential.token_expiry}");
        assert_eq!(parsed.contexts[0].context.cluster, bundle.context);
        assert_eq!(parsed.current_context, bundle.context);
    }

    #[test]
    fn kube_can_parse_the_bundle() {
        let bundle = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        let parsed = kube::config::Kubeconfig::from_yaml(&bundle.kubeconfig).unwrap();
        assert_eq!(parsed.current_context.as_deref(), Some("acme-prod_us-west1-a_demo"));
    }

    #[test]
    fn invalid_ca_is_rejected() {
        let err = composer().compose("demo", "1.2.3.4", "not base64!").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(composer().compose("demo", "", "QUJD").is_err());
    }

    #[test]
    fn debug_hides_the_kubeconfig() {
        let bundle = composer().compose("demo", "1.2.3.4", "QUJD").unwrap();
        let debug = format!("{bundle:?}");
        assert!(!debug.contains("1.2.3.4"));
        assert!(debug.contains("acme-prod_us-west1-a_demo"));
    }
}
