use crate::crd::bundle::{Bundle, BundleTarget};
use crate::crd::bundle_deployment::{BundleDeployment, BundleDeploymentSpec};
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::ClusterGroup;
use crate::crd::namespace_mapping::BundleNamespaceMapping;
use crate::crd::options::BundleDeploymentOptions;
use crate::crd::{
    BUNDLE_NAMESPACE_LABEL, BUNDLE_NAME_LABEL, CLUSTER_NAMESPACE_LABEL, CLUSTER_NAME_LABEL,
    MANAGED_LABEL,
};
use crate::error::{Error, Result};
use crate::options;
use crate::selector::{self, ClusterMatcher};
use crate::values;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use kube::core::SelectorExt;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Join of one bundle with one matching cluster for a single reconcile:
/// the merged options, the computed deployment id and the existing
/// deployment record, if any. Owned by the reconcile invocation.
#[derive(Clone, Debug)]
pub struct Target {
    pub cluster: Cluster,
    pub cluster_groups: Vec<ClusterGroup>,
    pub options: BundleDeploymentOptions,
    pub deployment_id: String,
    pub deployment: Option<BundleDeployment>,
}

impl Target {
    pub fn cluster_name(&self) -> String {
        self.cluster.name_any()
    }

    /// Namespace holding this target's deployment record; None until the
    /// downstream namespace has been assigned.
    pub fn deployment_namespace(&self) -> Option<String> {
        self.cluster.status.as_ref()?.namespace.clone()
    }

    pub fn group_refs(&self) -> Vec<&ClusterGroup> {
        self.cluster_groups.iter().collect()
    }

    pub fn is_paused(&self, bundle: &Bundle) -> bool {
        bundle.spec.paused || self.cluster.spec.paused
    }

    pub fn is_unavailable(&self) -> bool {
        self.deployment
            .as_ref()
            .is_some_and(deployment_unavailable)
    }

    /// Empty record for a cluster that has none yet; staged/live ids are
    /// filled by the rollout scheduler.
    pub fn new_deployment(&self, bundle: &Bundle) -> Option<BundleDeployment> {
        let namespace = self.deployment_namespace()?;
        let mut labels = BTreeMap::new();
        labels.insert(BUNDLE_NAME_LABEL.to_string(), bundle.name_any());
        labels.insert(
            BUNDLE_NAMESPACE_LABEL.to_string(),
            bundle.namespace().unwrap_or_default(),
        );
        labels.insert(CLUSTER_NAME_LABEL.to_string(), self.cluster.name_any());
        labels.insert(
            CLUSTER_NAMESPACE_LABEL.to_string(),
            self.cluster.namespace().unwrap_or_default(),
        );
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        Some(BundleDeployment {
            metadata: ObjectMeta {
                name: Some(bundle.name_any()),
                namespace: Some(namespace),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            spec: BundleDeploymentSpec::default(),
            status: None,
        })
    }
}

/// applied ≠ live, or the deployer has not reported ready.
pub fn deployment_unavailable(deployment: &BundleDeployment) -> bool {
    let status = deployment.status.clone().unwrap_or_default();
    deployment.spec.deployment_id != status.applied_deployment_id || !status.ready
}

/// staged == live == applied and ready.
pub fn deployment_up_to_date(deployment: &BundleDeployment) -> bool {
    deployment.spec.staged_deployment_id == deployment.spec.deployment_id
        && !deployment_unavailable(deployment)
}

/// Resolve the bundle's sorted target list over the candidate clusters.
/// Cluster-group membership, restriction semantics and the value pipeline
/// all happen here; existing deployments are attached separately.
pub fn resolve_targets(
    bundle: &Bundle,
    clusters: &[Cluster],
    groups: &[ClusterGroup],
    manifest_id: &str,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for cluster in clusters {
        let member_groups = selector::groups_for(cluster, groups);

        if production_match(bundle, cluster, &member_groups).is_none() {
            continue;
        }
        let Some(customization) = customization_for(bundle, cluster, &member_groups) else {
            continue;
        };
        if do_not_deploy_requested(bundle, cluster, &member_groups) {
            continue;
        }

        let mut merged = options::merge_options(&bundle.spec.defaults, &customization.options);
        merged.content_id = Some(manifest_id.to_string());
        values::preprocess_helm_values(&mut merged, cluster)?;
        let deployment_id = options::deployment_id(manifest_id, &merged)?;

        targets.push(Target {
            cluster: cluster.clone(),
            cluster_groups: member_groups.into_iter().cloned().collect(),
            options: merged,
            deployment_id,
            deployment: None,
        });
    }
    targets.sort_by_key(Target::cluster_name);
    Ok(targets)
}

/// First target visible to production matching: the entry must match the
/// cluster and, when the whitelist is non-empty, some whitelist entry must
/// match the cluster as well.
pub fn production_match<'a>(
    bundle: &'a Bundle,
    cluster: &Cluster,
    groups: &[&ClusterGroup],
) -> Option<&'a BundleTarget> {
    if !bundle.spec.target_restrictions.is_empty() && !whitelisted(bundle, cluster, groups) {
        return None;
    }
    customization_for(bundle, cluster, groups)
}

fn whitelisted(bundle: &Bundle, cluster: &Cluster, groups: &[&ClusterGroup]) -> bool {
    bundle.spec.target_restrictions.iter().any(|restriction| {
        match ClusterMatcher::compile(&restriction.criteria) {
            Ok(matcher) => matcher.matches(cluster, groups),
            Err(error) => {
                warn!(bundle = %bundle.name_any(), %error, "skipping target restriction");
                false
            }
        }
    })
}

/// First matching entry with restrictions ignored; this is how downstream
/// authored customizations contribute options without widening the
/// distribution surface.
pub fn customization_for<'a>(
    bundle: &'a Bundle,
    cluster: &Cluster,
    groups: &[&ClusterGroup],
) -> Option<&'a BundleTarget> {
    matching_targets(bundle, cluster, groups).into_iter().next()
}

/// Scan variant: a `doNotDeploy` on any matching entry opts the cluster
/// out, even when an earlier broad customization would shadow it under
/// first-match semantics.
pub fn do_not_deploy_requested(
    bundle: &Bundle,
    cluster: &Cluster,
    groups: &[&ClusterGroup],
) -> bool {
    matching_targets(bundle, cluster, groups)
        .iter()
        .any(|target| target.do_not_deploy)
}

fn matching_targets<'a>(
    bundle: &'a Bundle,
    cluster: &Cluster,
    groups: &[&ClusterGroup],
) -> Vec<&'a BundleTarget> {
    bundle
        .spec
        .targets
        .iter()
        .filter(|target| match ClusterMatcher::compile(&target.criteria) {
            Ok(matcher) => matcher.matches(cluster, groups),
            Err(error) => {
                warn!(bundle = %bundle.name_any(), %error, "skipping target");
                false
            }
        })
        .collect()
}

/// Attach existing deployment records, keyed by the cluster's downstream
/// namespace. Targets whose cluster has none keep `deployment = None`.
pub fn attach_deployments(targets: &mut [Target], deployments: Vec<BundleDeployment>) {
    let mut by_namespace: HashMap<String, BundleDeployment> = deployments
        .into_iter()
        .filter_map(|deployment| Some((deployment.namespace()?, deployment)))
        .collect();
    for target in targets.iter_mut() {
        if let Some(namespace) = target.deployment_namespace() {
            target.deployment = by_namespace.remove(&namespace);
        }
    }
}

/// Namespaces a mapping contributes for this bundle: empty unless the
/// bundle selector matches the bundle, then every namespace matching the
/// namespace selector.
pub fn mapping_namespaces(
    mapping: &BundleNamespaceMapping,
    bundle: &Bundle,
    namespaces: &[Namespace],
) -> Result<Vec<String>> {
    let (Some(bundle_selector), Some(namespace_selector)) = (
        mapping.spec.bundle_selector.as_ref(),
        mapping.spec.namespace_selector.as_ref(),
    ) else {
        return Ok(Vec::new());
    };

    let bundle_selector = selector::compile(bundle_selector)
        .map_err(|e| Error::InvalidNamespaceMapping(e.to_string()))?;
    if !bundle_selector.matches(bundle.labels()) {
        return Ok(Vec::new());
    }

    let namespace_selector = selector::compile(namespace_selector)
        .map_err(|e| Error::InvalidNamespaceMapping(e.to_string()))?;
    Ok(namespaces
        .iter()
        .filter(|namespace| namespace_selector.matches(namespace.labels()))
        .map(|namespace| namespace.name_any())
        .collect())
}
