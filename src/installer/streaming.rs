//! Strimzi Kafka operator and a single-broker Kafka cluster

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    metadata, object, CustomResourcePlan, EndpointLookup, InstallPlan, ManifestStep, ServiceRef,
};
use crate::graph::FieldValue;

/// Strimzi install settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    /// Installer name
    pub name: String,
    /// Namespace for the operator and the Kafka cluster
    pub namespace: String,
    /// Operator manifest, relative to the manifests directory
    pub operator_manifest: String,
    /// Name of the `Kafka` resource
    pub cluster_name: String,
    /// Kafka version
    pub kafka_version: String,
    /// Broker replicas
    pub replicas: u32,
    /// ZooKeeper replicas
    pub zookeeper_replicas: u32,
    /// Persistent volume size for brokers and ZooKeeper
    pub storage_size: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            name: "strimzi".to_string(),
            namespace: "kafka".to_string(),
            operator_manifest: "strimzi-operator/strimzi-operator.yaml".to_string(),
            cluster_name: "kafka-cluster".to_string(),
            kafka_version: "2.5.0".to_string(),
            replicas: 1,
            zookeeper_replicas: 1,
            storage_size: "100Gi".to_string(),
        }
    }
}

impl StreamingConfig {
    /// `log.message.format.version`: major.minor of the Kafka version
    fn message_format_version(&self) -> String {
        self.kafka_version
            .splitn(3, '.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    fn kafka_spec(&self) -> serde_json::Value {
        // Replication settings can't exceed the broker count
        let replication = self.replicas.min(3);
        json!({
            "kafka": {
                "version": self.kafka_version,
                "replicas": self.replicas,
                "listeners": {"plain": {}, "tls": {}},
                "config": {
                    "offsets.topic.replication.factor": replication,
                    "transaction.state.log.replication.factor": replication,
                    "transaction.state.log.min.isr": replication.min(2),
                    "log.message.format.version": self.message_format_version(),
                },
                "storage": {
                    "type": "jbod",
                    "volumes": [{
                        "id": 0,
                        "type": "persistent-claim",
                        "size": self.storage_size,
                        "deleteClaim": false,
                    }],
                },
            },
            "zookeeper": {
                "replicas": self.zookeeper_replicas,
                "storage": {
                    "type": "persistent-claim",
                    "size": self.storage_size,
                    "deleteClaim": false,
                },
            },
            "entityOperator": {"topicOperator": {}, "userOperator": {}},
        })
    }

    /// Namespace, operator, `Kafka` resource, then the bootstrap service's cluster IP
    pub fn plan(&self) -> InstallPlan {
        let kafka = object(
            "kafka.strimzi.io/v1beta1",
            "Kafka",
            metadata(self.cluster_name.as_str(), Some(self.namespace.as_str().into())),
            [("spec", FieldValue::from(self.kafka_spec()))],
        );

        InstallPlan {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            crds: Vec::new(),
            workloads: vec![ManifestStep::File {
                name: format!("{}-operator", self.name),
                path: self.operator_manifest.clone(),
            }],
            custom_resources: vec![CustomResourcePlan {
                name: self.cluster_name.clone(),
                manifest: kafka,
            }],
            endpoint: Some(EndpointLookup {
                name: format!("{}-bootstrap-svc", self.cluster_name),
                namespace: self.namespace.clone(),
                service: ServiceRef::FromCustomResource {
                    suffix: "-kafka-bootstrap".to_string(),
                },
                field: "/spec/clusterIP".to_string(),
                timeout_secs: None,
            }),
        }
    }
}
