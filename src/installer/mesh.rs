//! Istio ingress and the Knative operator
//!
//! Istio goes first: its ingress gateway's load-balancer IP becomes the
//! wildcard DNS domain Knative Serving routes under.

use serde::{Deserialize, Serialize};

use super::{
    install as install_plan, metadata, namespace_manifest, object, CustomResourcePlan,
    EndpointLookup, InstallContext, InstallPlan, Installed, ManifestStep, ServiceRef,
};
use crate::graph::{FieldValue, ResourceKind};
use crate::{Error, Result};

const KNATIVE_OPERATOR_API: &str = "operator.knative.dev/v1alpha1";

/// Istio and Knative install settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    /// Istio CRD manifest
    pub istio_crds: String,
    /// Minimal Istio install manifest
    pub istio_manifest: String,
    /// Namespace of the ingress gateway
    pub ingress_namespace: String,
    /// Ingress gateway service
    pub ingress_service: String,
    /// How long to wait for the gateway's load balancer
    pub ingress_timeout_secs: Option<u64>,
    /// Knative operator manifest
    pub knative_operator: String,
    /// Namespace of `KnativeServing`
    pub serving_namespace: String,
    /// Namespace of `KnativeEventing`
    pub eventing_namespace: String,
    /// Wildcard DNS service appended to the ingress IP
    pub domain_suffix: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            istio_crds: "istio/istio-crds.yaml".to_string(),
            istio_manifest: "istio/istio-minimal.yaml".to_string(),
            ingress_namespace: "istio-system".to_string(),
            ingress_service: "istio-ingressgateway".to_string(),
            ingress_timeout_secs: None,
            knative_operator: "knative-operator/knative-operator.yaml".to_string(),
            serving_namespace: "knative-serving".to_string(),
            eventing_namespace: "knative-eventing".to_string(),
            domain_suffix: "xip.io".to_string(),
        }
    }
}

impl MeshConfig {
    /// Istio CRDs, minimal install, then the gateway's load-balancer IP
    pub fn istio_plan(&self) -> InstallPlan {
        InstallPlan {
            name: "istio".to_string(),
            namespace: self.ingress_namespace.clone(),
            crds: vec![ManifestStep::File {
                name: "istio-crds".to_string(),
                path: self.istio_crds.clone(),
            }],
            workloads: vec![ManifestStep::File {
                name: "istio-minimal".to_string(),
                path: self.istio_manifest.clone(),
            }],
            custom_resources: Vec::new(),
            endpoint: Some(EndpointLookup {
                name: format!("{}-ip", self.ingress_service),
                namespace: self.ingress_namespace.clone(),
                service: ServiceRef::Named(self.ingress_service.clone()),
                field: "/status/loadBalancer/ingress/0/ip".to_string(),
                timeout_secs: self.ingress_timeout_secs,
            }),
        }
    }

    /// `{ip}.{suffix}` for an ingress IP value
    pub fn domain(&self, ingress_ip: &FieldValue) -> Result<FieldValue> {
        match ingress_ip {
            FieldValue::Output(ip) => Ok(FieldValue::interpolate(
                format!("{{0}}.{}", self.domain_suffix),
                [ip.clone()],
            )),
            FieldValue::Literal(serde_json::Value::String(ip)) => {
                Ok(format!("{ip}.{}", self.domain_suffix).into())
            }
            other => Err(Error::validation(format!(
                "ingress IP must be an output or a string, got {other:?}"
            ))),
        }
    }

    /// Knative operator, then serving and eventing in their own namespaces
    pub fn knative_plan(&self, domain: FieldValue) -> InstallPlan {
        let serving = object(
            KNATIVE_OPERATOR_API,
            "KnativeServing",
            metadata(
                self.serving_namespace.as_str(),
                Some(self.serving_namespace.as_str().into()),
            ),
            [(
                "spec",
                FieldValue::object([(
                    "config",
                    FieldValue::object([("domain", FieldValue::entry(domain, ""))]),
                )]),
            )],
        );
        let eventing = object(
            KNATIVE_OPERATOR_API,
            "KnativeEventing",
            metadata(
                self.eventing_namespace.as_str(),
                Some(self.eventing_namespace.as_str().into()),
            ),
            [],
        );

        InstallPlan {
            name: "knative".to_string(),
            namespace: self.serving_namespace.clone(),
            crds: Vec::new(),
            workloads: vec![
                ManifestStep::File {
                    name: "knative-operator".to_string(),
                    path: self.knative_operator.clone(),
                },
                ManifestStep::Object {
                    kind: ResourceKind::Namespace,
                    name: self.eventing_namespace.clone(),
                    manifest: namespace_manifest(&self.eventing_namespace),
                },
            ],
            custom_resources: vec![
                CustomResourcePlan {
                    name: self.serving_namespace.clone(),
                    manifest: serving,
                },
                CustomResourcePlan {
                    name: self.eventing_namespace.clone(),
                    manifest: eventing,
                },
            ],
            endpoint: None,
        }
    }
}

/// Install Istio, then Knative once the ingress IP is known
pub fn install(ctx: &mut InstallContext<'_>, config: &MeshConfig) -> Result<Installed> {
    let istio = install_plan(ctx, &config.istio_plan(), &[])?;
    let ingress_ip = istio
        .endpoint
        .clone()
        .ok_or_else(|| Error::validation("istio install has no ingress lookup"))?;
    let domain = config.domain(&ingress_ip)?;

    let after: Vec<_> = istio.last().into_iter().collect();
    let knative = install_plan(ctx, &config.knative_plan(domain.clone()), &after)?;

    let mut resources = istio.resources;
    resources.extend(knative.resources);
    Ok(Installed {
        name: "mesh".to_string(),
        namespace: knative.namespace,
        endpoint: Some(ingress_ip),
        resources,
        exports: vec![("istioDomain".to_string(), domain)],
    })
}
