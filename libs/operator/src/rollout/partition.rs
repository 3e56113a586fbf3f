use crate::crd::bundle::RolloutStrategy;
use crate::crd::summary::PartitionStatus;
use crate::rollout::limit::limit;
use crate::selector::ClusterMatcher;
use crate::target::Target;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::warn;

/// Below this many targets everything rolls out as one partition.
pub const AUTO_PARTITION_THRESHOLD: usize = 200;

/// Ordered subset of targets sharing one max-unavailable budget. Holds
/// indices into the reconcile's target list.
#[derive(Clone, Debug)]
pub struct Partition {
    pub status: PartitionStatus,
    pub targets: Vec<usize>,
}

/// Split the sorted target list according to the rollout strategy: explicit
/// partitions when given, size-based partitions otherwise.
pub fn partitions(strategy: Option<&RolloutStrategy>, targets: &[Target]) -> Vec<Partition> {
    match strategy {
        Some(s) if !s.partitions.is_empty() => manual(s, targets),
        _ => automatic(strategy, targets),
    }
}

/// Each target is claimed by the first partition definition matching it;
/// definitions that fail to compile are skipped. Unmatched targets stay
/// outside every partition.
fn manual(strategy: &RolloutStrategy, targets: &[Target]) -> Vec<Partition> {
    let mut claimed = vec![false; targets.len()];
    let mut result = Vec::new();

    for (index, definition) in strategy.partitions.iter().enumerate() {
        let matcher = match ClusterMatcher::compile(&definition.criteria) {
            Ok(matcher) => matcher,
            Err(error) => {
                warn!(partition = index, %error, "skipping partition definition");
                continue;
            }
        };
        let members: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(i, target)| {
                !claimed[*i] && matcher.matches(&target.cluster, &target.group_refs())
            })
            .map(|(i, _)| i)
            .collect();
        for &i in &members {
            claimed[i] = true;
        }

        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| format!("Partition {index}"));
        result.push(new_partition(
            name,
            members,
            targets,
            &[
                definition.max_unavailable.as_ref(),
                strategy.max_unavailable.as_ref(),
            ],
        ));
    }
    result
}

fn automatic(strategy: Option<&RolloutStrategy>, targets: &[Target]) -> Vec<Partition> {
    let max_unavailable = strategy.and_then(|s| s.max_unavailable.as_ref());
    let auto_size = strategy.and_then(|s| s.auto_partition_size.as_ref());

    if let Some(IntOrString::Int(size)) = auto_size {
        if *size <= 0 {
            return vec![single(targets, max_unavailable)];
        }
    }
    if targets.len() < AUTO_PARTITION_THRESHOLD {
        return vec![single(targets, max_unavailable)];
    }

    let default_size = IntOrString::String("25%".to_string());
    let chunk = limit(targets.len(), &[auto_size, Some(&default_size)]).max(1);

    (0..targets.len())
        .step_by(chunk)
        .map(|start| {
            let end = (start + chunk).min(targets.len());
            new_partition(
                format!("Partition {start} - {end}"),
                (start..end).collect(),
                targets,
                &[max_unavailable],
            )
        })
        .collect()
}

fn single(targets: &[Target], max_unavailable: Option<&IntOrString>) -> Partition {
    new_partition(
        "All".to_string(),
        (0..targets.len()).collect(),
        targets,
        &[max_unavailable],
    )
}

fn new_partition(
    name: String,
    members: Vec<usize>,
    targets: &[Target],
    max_unavailable: &[Option<&IntOrString>],
) -> Partition {
    let unavailable = members
        .iter()
        .filter(|&&i| targets[i].is_unavailable())
        .count();
    Partition {
        status: PartitionStatus {
            name,
            count: members.len() as i32,
            max_unavailable: limit(members.len(), max_unavailable) as i32,
            unavailable: unavailable as i32,
            summary: Default::default(),
        },
        targets: members,
    }
}
