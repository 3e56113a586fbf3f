use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lets bundles in this mapping's namespace target clusters in other
/// namespaces: bundles matched by `bundleSelector` gain every namespace
/// whose labels match `namespaceSelector`. Both selectors must be present
/// for the mapping to contribute.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "BundleNamespaceMapping",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BundleNamespaceMappingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}
