pub mod bundle;
pub mod bundle_deployment;
pub mod cluster;
pub mod cluster_group;
pub mod content;
pub mod namespace_mapping;
pub mod options;
pub mod summary;

/// Labels stamped on every managed BundleDeployment so that back-references
/// are resolved by lookup instead of in-memory pointers.
pub const BUNDLE_NAME_LABEL: &str = "flotilla.dev/bundle-name";
pub const BUNDLE_NAMESPACE_LABEL: &str = "flotilla.dev/bundle-namespace";
pub const CLUSTER_NAME_LABEL: &str = "flotilla.dev/cluster-name";
pub const CLUSTER_NAMESPACE_LABEL: &str = "flotilla.dev/cluster-namespace";
pub const MANAGED_LABEL: &str = "flotilla.dev/managed";

/// Rancher-originated clusters carry the user-facing name in this label;
/// `clusterName` criteria match it as a fallback to the resource name.
pub const CLUSTER_DISPLAY_NAME_LABEL: &str = "management.cattle.io/cluster-display-name";

pub const READY_CONDITION: &str = "Ready";
pub const DEPLOYED_CONDITION: &str = "Deployed";
pub const MONITORED_CONDITION: &str = "Monitored";
