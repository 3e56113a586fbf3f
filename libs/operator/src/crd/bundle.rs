use crate::crd::options::BundleDeploymentOptions;
use crate::crd::summary::{BundleDisplay, PartitionStatus, ResourceKey, Summary};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declarative unit of distribution: an ordered resource list plus the
/// targeting rules deciding which clusters receive it, at which pace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "flotilla.dev", version = "v1alpha1", kind = "Bundle", namespaced)]
#[kube(status = "BundleStatus")]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<BundleResource>,

    /// Options applied to every target unless overridden per target.
    #[serde(default)]
    pub defaults: BundleDeploymentOptions,

    /// Ordered, first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<BundleTarget>,

    /// Whitelist written by the pipeline producer. When non-empty, a target
    /// is only eligible for production matching if some entry here also
    /// matches the cluster; entries still contribute customizations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_restrictions: Vec<BundleTargetRestriction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_strategy: Option<RolloutStrategy>,

    #[serde(default)]
    pub paused: bool,

    /// Copied verbatim onto every deployment record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<BundleRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Empty, `base64` or `base64+gz`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// The four independent matching axes of a target. A cluster matches iff
/// every specified axis matches; a criteria block with no axis set matches
/// nothing.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetCriteria {
    /// Cluster resource name, or its Rancher display-name label value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,
    /// Selects over a cluster group's own labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group_selector: Option<LabelSelector>,
    /// Selects over the cluster's labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub criteria: TargetCriteria,
    #[serde(flatten)]
    pub options: BundleDeploymentOptions,
    /// A matching entry with this flag skips the cluster entirely.
    #[serde(default)]
    pub do_not_deploy: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTargetRestriction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub criteria: TargetCriteria,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    /// Global budget: how many non-ready deployments may exist while rolling
    /// forward. Int or percentage; `100%` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// How many partitions may be over their own budget before the rollout
    /// halts. `0` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_partitions: Option<IntOrString>,

    /// Chunk size for automatic partitioning; `25%` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_partition_size: Option<IntOrString>,

    /// Explicit ordered partitions; disables automatic partitioning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartitionDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(flatten)]
    pub criteria: TargetCriteria,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub newly_created: i32,
    #[serde(default)]
    pub max_new: i32,
    #[serde(default)]
    pub unavailable: i32,
    #[serde(default)]
    pub max_unavailable: i32,
    #[serde(default)]
    pub unavailable_partitions: i32,
    #[serde(default)]
    pub max_unavailable_partitions: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionStatus>,
    /// Sorted, deduplicated identities of every object the bundle's declared
    /// targets would produce.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_key: Vec<ResourceKey>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub display: BundleDisplay,
}
