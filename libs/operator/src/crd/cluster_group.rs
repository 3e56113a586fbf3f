use crate::crd::summary::Summary;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Named, label-selected set of clusters in one namespace. Targets may
/// select groups by name or by the group's own labels.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "ClusterGroup",
    namespaced
)]
#[kube(status = "ClusterGroupStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub cluster_count: i32,
    #[serde(default)]
    pub non_ready_cluster_count: i32,
    /// Sum over the summaries of all matching clusters.
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub display: ClusterGroupDisplay,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupDisplay {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ready_clusters: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}
