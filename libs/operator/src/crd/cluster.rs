use crate::crd::options::GenericMap;
use crate::crd::summary::Summary;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A registered downstream Kubernetes target. Registration itself is an
/// external concern; the core reads labels, annotations and the assigned
/// downstream namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "flotilla.dev", version = "v1alpha1", kind = "Cluster", namespaced)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses promotion of every deployment targeting this cluster.
    #[serde(default)]
    pub paused: bool,

    /// Arbitrary values exposed to value templates as `ClusterValues`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_values: Option<GenericMap>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// System namespace holding this cluster's deployment records. Assigned
    /// asynchronously by a separate controller; empty until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Sum over this cluster's bundle deployments.
    #[serde(default)]
    pub summary: Summary,

    #[serde(default)]
    pub display: ClusterDisplay,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDisplay {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ready_bundles: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}
