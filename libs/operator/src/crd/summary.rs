use crate::crd::bundle_deployment::{ModifiedStatus, NonReadyStatus};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-deployment state. Variant order is the aggregation rank: when
/// summarizing a set, the highest variant present wins the display state.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    JsonSchema,
)]
pub enum BundleState {
    Ready,
    #[default]
    Pending,
    WaitApplied,
    NotReady,
    OutOfSync,
    Modified,
    ErrApplied,
}

impl std::fmt::Display for BundleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BundleState::Ready => "Ready",
            BundleState::Pending => "Pending",
            BundleState::WaitApplied => "WaitApplied",
            BundleState::NotReady => "NotReady",
            BundleState::OutOfSync => "OutOfSync",
            BundleState::Modified => "Modified",
            BundleState::ErrApplied => "ErrApplied",
        };
        f.write_str(s)
    }
}

/// Counter block shared by bundle, cluster and cluster group status.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub desired_ready: i32,
    #[serde(default)]
    pub wait_applied: i32,
    #[serde(default)]
    pub err_applied: i32,
    #[serde(default)]
    pub out_of_sync: i32,
    #[serde(default)]
    pub modified: i32,
    #[serde(default)]
    pub not_ready: i32,
    #[serde(default)]
    pub pending: i32,
    /// Bounded set of non-ready examples with their messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_ready_resources: Vec<NonReadyResource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NonReadyResource {
    pub name: String,
    #[serde(default)]
    pub state: BundleState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified_status: Vec<ModifiedStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_ready_status: Vec<NonReadyStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub max_unavailable: i32,
    #[serde(default)]
    pub unavailable: i32,
    #[serde(default)]
    pub summary: Summary,
}

/// Identity of one object a bundle would create, for `status.resourceKey`.
#[derive(
    Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleDisplay {
    /// `"<ready>/<desired>"`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ready_clusters: String,
    /// Worst state across the bundle's deployments.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}
