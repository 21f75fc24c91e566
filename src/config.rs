//! Stack configuration
//!
//! A stack is described by one YAML file. Everything has a default except the
//! project and zone, which may also come from the command line. The config is
//! validated once on load and then passed explicitly to whatever needs it.
//!
//! ```yaml
//! project: acme-prod
//! zone: us-west1-a
//! cluster:
//!   initialNodeCount: 3
//! operators:
//!   cicd: null        # skip Tekton
//! materializer:
//!   onFailure: continue
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::installer::{CicdConfig, Installer, MeshConfig, SecretsConfig, StreamingConfig};
use crate::materializer::MaterializerConfig;
use crate::{Error, Result};

/// Cloud service account ids are 6 to 30 characters
const ACCOUNT_ID_MAX: usize = 30;

/// Managed cluster settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,
    /// Nodes in the default pool
    pub initial_node_count: u32,
    /// Minimum control plane version; the provider default when unset
    pub min_master_version: Option<String>,
    /// Node machine type
    pub machine_type: String,
    /// OAuth scopes granted to nodes
    pub oauth_scopes: Vec<String>,
    /// Node labels
    pub labels: BTreeMap<String, String>,
    /// Network tags on nodes
    pub tags: Vec<String>,
    /// Basic-auth user of the control plane
    pub master_username: String,
    /// Length of the generated control plane password
    pub password_length: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let machine_type = "n1-standard-2".to_string();
        Self {
            name: "stratum".to_string(),
            initial_node_count: 3,
            min_master_version: None,
            labels: BTreeMap::from([("instanceType".to_string(), machine_type.clone())]),
            machine_type,
            oauth_scopes: [
                "https://www.googleapis.com/auth/compute",
                "https://www.googleapis.com/auth/devstorage.read_only",
                "https://www.googleapis.com/auth/logging.write",
                "https://www.googleapis.com/auth/monitoring",
            ]
            .map(String::from)
            .to_vec(),
            tags: vec!["stratum".to_string()],
            master_username: "admin".to_string(),
            password_length: 20,
        }
    }
}

/// Operators to install; `null` skips one
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorsConfig {
    /// Berglas secrets webhook
    pub secrets: Option<SecretsConfig>,
    /// Strimzi Kafka
    pub streaming: Option<StreamingConfig>,
    /// Istio and Knative
    pub mesh: Option<MeshConfig>,
    /// Tekton
    pub cicd: Option<CicdConfig>,
}

impl Default for OperatorsConfig {
    fn default() -> Self {
        Self {
            secrets: Some(SecretsConfig::default()),
            streaming: Some(StreamingConfig::default()),
            mesh: Some(MeshConfig::default()),
            cicd: Some(CicdConfig::default()),
        }
    }
}

/// Values that take precedence over the file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Cloud project
    pub project: Option<String>,
    /// Cluster zone
    pub zone: Option<String>,
}

/// Everything needed to declare a stack
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackConfig {
    /// Cloud project
    pub project: String,
    /// Cluster zone
    pub zone: String,
    /// Default region for regional resources
    pub region: Option<String>,
    /// Managed cluster
    pub cluster: ClusterConfig,
    /// Namespace for applications
    pub apps_namespace: Option<String>,
    /// Directory manifest files are read from
    pub manifests_dir: Option<PathBuf>,
    /// Directory source archives are read from
    pub source_dir: Option<PathBuf>,
    /// Operators to install
    pub operators: OperatorsConfig,
    /// Materializer settings
    pub materializer: MaterializerConfig,
}

impl StackConfig {
    /// Default stack in `project`/`zone`
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            ..Default::default()
        }
    }

    /// Read, override and validate a config file
    pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&yaml, overrides)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Parse, override and validate YAML
    pub fn from_yaml(yaml: &str, overrides: &ConfigOverrides) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid stack config: {e}")))?;
        let config = config.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(project) = &overrides.project {
            self.project = project.clone();
        }
        if let Some(zone) = &overrides.zone {
            self.zone = zone.clone();
        }
        self
    }

    /// Region, defaulting to the zone's region
    pub fn region(&self) -> String {
        match &self.region {
            Some(region) => region.clone(),
            None => self
                .zone
                .rsplit_once('-')
                .map(|(region, _)| region.to_string())
                .unwrap_or_else(|| self.zone.clone()),
        }
    }

    /// Namespace for applications
    pub fn apps_namespace(&self) -> &str {
        self.apps_namespace.as_deref().unwrap_or("apps")
    }

    /// Directory manifest files are read from
    pub fn manifests_dir(&self) -> PathBuf {
        self.manifests_dir.clone().unwrap_or_else(|| PathBuf::from("manifests"))
    }

    /// Directory source archives are read from
    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Enabled installers in install order
    pub fn installers(&self) -> Vec<Installer> {
        let ops = &self.operators;
        [
            ops.secrets.clone().map(Installer::Secrets),
            ops.streaming.clone().map(Installer::Streaming),
            ops.mesh.clone().map(Installer::Mesh),
            ops.cicd.clone().map(Installer::Cicd),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Check the config for values the cloud or cluster APIs would reject
    pub fn validate(&self) -> Result<()> {
        validate_project(&self.project)?;
        if self.zone.trim().is_empty() {
            return Err(Error::config("zone is required"));
        }
        validate_label("cluster.name", &self.cluster.name, 40)?;
        if self.cluster.initial_node_count == 0 {
            return Err(Error::config("cluster.initialNodeCount must be at least 1"));
        }
        if self.cluster.password_length < 16 {
            return Err(Error::config("cluster.passwordLength must be at least 16"));
        }
        validate_label("appsNamespace", self.apps_namespace(), 63)?;

        if self.materializer.concurrency == 0 {
            return Err(Error::config("materializer.concurrency must be at least 1"));
        }
        self.materializer
            .retry
            .validate()
            .map_err(|e| Error::config(format!("materializer.retry.{e}")))?;

        if let Some(secrets) = &self.operators.secrets {
            validate_label("operators.secrets.name", &secrets.name, ACCOUNT_ID_MAX)?;
            let account_id_len = secrets.name.len() + 1 + secrets.suffix_length as usize;
            if secrets.suffix_length == 0 || !(6..=ACCOUNT_ID_MAX).contains(&account_id_len) {
                return Err(Error::config(format!(
                    "operators.secrets: account id '{}-<{} chars>' must be 6 to {} characters",
                    secrets.name, secrets.suffix_length, ACCOUNT_ID_MAX
                )));
            }
            if secrets.roles.is_empty() {
                return Err(Error::config("operators.secrets.roles must not be empty"));
            }
        }
        if let Some(streaming) = &self.operators.streaming {
            validate_label("operators.streaming.namespace", &streaming.namespace, 63)?;
            if streaming.replicas == 0 || streaming.zookeeper_replicas == 0 {
                return Err(Error::config("operators.streaming replicas must be at least 1"));
            }
        }
        if let Some(cicd) = &self.operators.cicd {
            validate_label("operators.cicd.name", &cicd.name, 63)?;
        }
        Ok(())
    }
}

fn validate_project(project: &str) -> Result<()> {
    let valid = (6..=30).contains(&project.len())
        && project.starts_with(|c: char| c.is_ascii_lowercase())
        && !project.ends_with('-')
        && project
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "project '{project}' must be 6-30 lowercase letters, digits or hyphens, \
             starting with a letter"
        )))
    }
}

/// Lowercase DNS label of at most `max` characters
fn validate_label(field: &str, value: &str, max: usize) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= max
        && value.starts_with(|c: char| c.is_ascii_lowercase())
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{field} '{value}' must be a lowercase DNS label of at most {max} characters"
        )))
    }
}
