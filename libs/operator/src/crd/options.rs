use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Arbitrary structured values, as found in Helm value files.
pub type GenericMap = serde_json::Map<String, serde_json::Value>;

/// Deployment options for one (bundle, cluster) pair. The bundle's
/// `defaults` block and the matched target's overrides are merged into one
/// of these before the deployment id is computed.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentOptions {
    /// Content store key of the manifest to apply. The deployer reads the
    /// payload from the content store by this key; resources are never
    /// inlined into the deployment record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,

    /// Namespace for resources that do not carry one themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Namespace forced onto every resource, overriding declared ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOptions>,

    /// Bumping this forces a redeploy even when nothing else changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_sync_generation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Inline values. Strings may use the `global.fleet.clusterLabels.`
    /// indirection and the `${ }` template syntax.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<GenericMap>,

    /// External value sources, merged over the inline values at deploy time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesFrom>,

    /// Skip the template pass over the values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_pre_process: Option<bool>,
}

/// Exactly one of the refs is expected to be set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFrom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<ValuesReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<ValuesReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Key inside the configmap/secret, `values.yaml` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
