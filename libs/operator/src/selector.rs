use crate::crd::bundle::TargetCriteria;
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::ClusterGroup;
use crate::crd::CLUSTER_DISPLAY_NAME_LABEL;
use crate::error::{Error, Result};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use tracing::warn;

/// One matching axis of a target entry, compiled.
#[derive(Clone, Debug)]
pub enum ClusterCriterion {
    /// Cluster resource name, with Rancher display-name fallback.
    Name(String),
    /// Membership in a cluster group of this name.
    GroupName(String),
    /// Membership in a cluster group whose own labels match.
    GroupSelector(Selector),
    /// The cluster's labels match.
    ClusterSelector(Selector),
}

/// All-of composite over the specified axes of one target entry. An entry
/// with no axes matches nothing.
#[derive(Clone, Debug, Default)]
pub struct ClusterMatcher {
    criteria: Vec<ClusterCriterion>,
}

pub fn compile(selector: &LabelSelector) -> Result<Selector> {
    Selector::try_from(selector.clone()).map_err(|e| Error::InvalidSelector(e.to_string()))
}

impl ClusterMatcher {
    pub fn compile(criteria: &TargetCriteria) -> Result<Self> {
        let mut list = Vec::new();
        if let Some(name) = &criteria.cluster_name {
            list.push(ClusterCriterion::Name(name.clone()));
        }
        if let Some(group) = &criteria.cluster_group {
            list.push(ClusterCriterion::GroupName(group.clone()));
        }
        if let Some(selector) = &criteria.cluster_group_selector {
            list.push(ClusterCriterion::GroupSelector(compile(selector)?));
        }
        if let Some(selector) = &criteria.cluster_selector {
            list.push(ClusterCriterion::ClusterSelector(compile(selector)?));
        }
        Ok(Self { criteria: list })
    }

    /// True iff every specified axis matches. Group axes are satisfied when
    /// at least one of the cluster's groups satisfies them.
    pub fn matches(&self, cluster: &Cluster, groups: &[&ClusterGroup]) -> bool {
        if self.criteria.is_empty() {
            return false;
        }
        self.criteria.iter().all(|criterion| match criterion {
            ClusterCriterion::Name(name) => {
                cluster.name_any() == *name
                    || cluster.labels().get(CLUSTER_DISPLAY_NAME_LABEL) == Some(name)
            }
            ClusterCriterion::GroupName(name) => groups.iter().any(|g| g.name_any() == *name),
            ClusterCriterion::GroupSelector(selector) => {
                groups.iter().any(|g| selector.matches(g.labels()))
            }
            ClusterCriterion::ClusterSelector(selector) => selector.matches(cluster.labels()),
        })
    }
}

/// The cluster groups (same namespace) whose selector matches the cluster.
/// Groups with an uncompilable selector are skipped.
pub fn groups_for<'a>(cluster: &Cluster, groups: &'a [ClusterGroup]) -> Vec<&'a ClusterGroup> {
    groups
        .iter()
        .filter(|group| group.namespace() == cluster.namespace())
        .filter(|group| {
            let Some(selector) = &group.spec.selector else {
                return false;
            };
            match compile(selector) {
                Ok(compiled) => compiled.matches(cluster.labels()),
                Err(error) => {
                    warn!(group = %group.name_any(), %error, "skipping cluster group");
                    false
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::cluster::ClusterSpec;
    use crate::crd::cluster_group::{ClusterGroup, ClusterGroupSpec};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn label_selector(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(labels(pairs)),
            ..LabelSelector::default()
        }
    }

    pub fn cluster(name: &str, namespace: &str, lbls: &[(&str, &str)]) -> Cluster {
        let mut cluster = Cluster::new(name, ClusterSpec::default());
        cluster.metadata.namespace = Some(namespace.to_string());
        cluster.metadata.labels = Some(labels(lbls));
        cluster
    }

    fn group(name: &str, namespace: &str, lbls: &[(&str, &str)], selector: LabelSelector) -> ClusterGroup {
        let mut group = ClusterGroup::new(
            name,
            ClusterGroupSpec {
                selector: Some(selector),
            },
        );
        group.metadata.namespace = Some(namespace.to_string());
        group.metadata.labels = Some(labels(lbls));
        group
    }

    #[test]
    fn no_criteria_matches_nothing() {
        let matcher = ClusterMatcher::compile(&TargetCriteria::default()).unwrap();
        let c = cluster("local", "fleet-local", &[("env", "dev")]);
        assert!(!matcher.matches(&c, &[]));
    }

    #[test]
    fn cluster_selector_matches_labels() {
        let matcher = ClusterMatcher::compile(&TargetCriteria {
            cluster_selector: Some(label_selector(&[("env", "dev")])),
            ..TargetCriteria::default()
        })
        .unwrap();
        assert!(matcher.matches(&cluster("a", "ns", &[("env", "dev")]), &[]));
        assert!(!matcher.matches(&cluster("b", "ns", &[("env", "prod")]), &[]));
    }

    #[test]
    fn cluster_name_falls_back_to_display_name_label() {
        let matcher = ClusterMatcher::compile(&TargetCriteria {
            cluster_name: Some("my-cluster".to_string()),
            ..TargetCriteria::default()
        })
        .unwrap();
        let rancher = cluster(
            "c-m-12345",
            "ns",
            &[(CLUSTER_DISPLAY_NAME_LABEL, "my-cluster")],
        );
        assert!(matcher.matches(&rancher, &[]));
        assert!(matcher.matches(&cluster("my-cluster", "ns", &[]), &[]));
        assert!(!matcher.matches(&cluster("other", "ns", &[]), &[]));
    }

    #[test]
    fn all_specified_axes_must_match() {
        let matcher = ClusterMatcher::compile(&TargetCriteria {
            cluster_name: Some("a".to_string()),
            cluster_selector: Some(label_selector(&[("env", "dev")])),
            ..TargetCriteria::default()
        })
        .unwrap();
        assert!(matcher.matches(&cluster("a", "ns", &[("env", "dev")]), &[]));
        assert!(!matcher.matches(&cluster("a", "ns", &[("env", "prod")]), &[]));
        assert!(!matcher.matches(&cluster("b", "ns", &[("env", "dev")]), &[]));
    }

    #[test]
    fn one_satisfying_group_is_enough() {
        let g1 = group("prod", "ns", &[("tier", "one")], label_selector(&[("env", "prod")]));
        let g2 = group("dev", "ns", &[("tier", "two")], label_selector(&[("env", "dev")]));
        let c = cluster("a", "ns", &[("env", "prod")]);

        let by_name = ClusterMatcher::compile(&TargetCriteria {
            cluster_group: Some("prod".to_string()),
            ..TargetCriteria::default()
        })
        .unwrap();
        assert!(by_name.matches(&c, &[&g1, &g2]));
        assert!(!by_name.matches(&c, &[&g2]));

        let by_group_labels = ClusterMatcher::compile(&TargetCriteria {
            cluster_group_selector: Some(label_selector(&[("tier", "one")])),
            ..TargetCriteria::default()
        })
        .unwrap();
        assert!(by_group_labels.matches(&c, &[&g1, &g2]));
        assert!(!by_group_labels.matches(&c, &[&g2]));
    }

    #[test]
    fn group_membership_is_selector_based_and_namespaced() {
        let g = group("prod", "ns", &[], label_selector(&[("env", "prod")]));
        let member = cluster("a", "ns", &[("env", "prod")]);
        let other_ns = cluster("b", "other", &[("env", "prod")]);
        let non_member = cluster("c", "ns", &[("env", "dev")]);

        let groups = vec![g];
        assert_eq!(groups_for(&member, &groups).len(), 1);
        assert!(groups_for(&other_ns, &groups).is_empty());
        assert!(groups_for(&non_member, &groups).is_empty());
    }

    #[test]
    fn invalid_selector_is_a_compile_error() {
        let bad = LabelSelector {
            match_expressions: Some(vec![
                k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "BogusOp".to_string(),
                    values: None,
                },
            ]),
            ..LabelSelector::default()
        };
        let result = ClusterMatcher::compile(&TargetCriteria {
            cluster_selector: Some(bad),
            ..TargetCriteria::default()
        });
        assert!(matches!(result, Err(Error::InvalidSelector(_))));
    }
}
