use crate::crd::bundle::{Bundle, BundleStatus};
use crate::crd::summary::Summary;
use crate::rollout::limit::limit;
use crate::rollout::partition::Partition;
use crate::target::{deployment_unavailable, deployment_up_to_date, Target};

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Cap on deployments synthesized for brand-new targets in one pass, so a
/// fresh bundle fans out gradually.
pub const MAX_NEW: usize = 50;

/// Stage every target's deployment id, then promote staged to live within
/// the global and per-partition budgets. Mutates the in-memory deployment
/// records; the reconciler converges the object store afterwards.
pub fn schedule(
    bundle: &Bundle,
    targets: &mut [Target],
    partitions: &mut [Partition],
    status: &mut BundleStatus,
) {
    let strategy = bundle.spec.rollout_strategy.as_ref();
    let max_unavailable = strategy.and_then(|s| s.max_unavailable.as_ref());
    let max_unavailable_partitions = strategy.and_then(|s| s.max_unavailable_partitions.as_ref());

    status.summary = Summary::default();
    status.partitions.clear();
    status.newly_created = 0;
    status.max_new = MAX_NEW as i32;
    status.unavailable = targets.iter().filter(|t| t.is_unavailable()).count() as i32;
    status.max_unavailable = limit(targets.len(), &[max_unavailable]) as i32;
    status.max_unavailable_partitions = limit(
        partitions.len(),
        &[max_unavailable_partitions, Some(&IntOrString::Int(0))],
    ) as i32;
    status.unavailable_partitions = 0;

    stage(bundle, targets, partitions, status);
    promote(bundle, targets, partitions, status);

    status.partitions = partitions
        .iter()
        .map(|partition| partition.status.clone())
        .collect();
}

fn stage(
    bundle: &Bundle,
    targets: &mut [Target],
    partitions: &[Partition],
    status: &mut BundleStatus,
) {
    for partition in partitions {
        for &index in &partition.targets {
            let target = &mut targets[index];
            if target.deployment.is_none() && status.newly_created < status.max_new {
                // clusters without a downstream namespace stay pending
                if let Some(deployment) = target.new_deployment(bundle) {
                    target.deployment = Some(deployment);
                    status.newly_created += 1;
                }
            }
            let paused = target.is_paused(bundle);
            if let Some(deployment) = target.deployment.as_mut() {
                deployment.spec.staged_deployment_id = target.deployment_id.clone();
                deployment.spec.staged_options = target.options.clone();
                deployment.spec.paused = paused;
                deployment.spec.depends_on = bundle.spec.depends_on.clone();
            }
        }
    }
}

fn promote(
    bundle: &Bundle,
    targets: &mut [Target],
    partitions: &mut [Partition],
    status: &mut BundleStatus,
) {
    for partition in partitions.iter_mut() {
        for &index in &partition.targets {
            let target = &mut targets[index];
            if target.is_paused(bundle) {
                continue;
            }
            let Some(deployment) = target.deployment.as_mut() else {
                continue;
            };
            if deployment.spec.staged_deployment_id.is_empty() {
                continue;
            }
            if deployment.spec.deployment_id == deployment.spec.staged_deployment_id {
                continue;
            }
            // upgrading an already-unavailable deployment consumes no budget
            let already_unavailable = deployment_unavailable(deployment);
            if !already_unavailable && status.unavailable >= status.max_unavailable {
                continue;
            }
            if !already_unavailable && partition.status.unavailable >= partition.status.max_unavailable
            {
                continue;
            }

            deployment.spec.deployment_id = deployment.spec.staged_deployment_id.clone();
            deployment.spec.options = deployment.spec.staged_options.clone();
            if !already_unavailable {
                status.unavailable += 1;
                partition.status.unavailable += 1;
            }
        }

        // partitions count stricter: anything not up to date is unavailable
        partition.status.unavailable = partition
            .targets
            .iter()
            .filter(|&&index| {
                targets[index]
                    .deployment
                    .as_ref()
                    .is_some_and(|deployment| !deployment_up_to_date(deployment))
            })
            .count() as i32;
        if partition.status.unavailable > partition.status.max_unavailable {
            status.unavailable_partitions += 1;
        }
        if status.unavailable_partitions > status.max_unavailable_partitions {
            // remaining partitions stay staged but are not promoted
            break;
        }
    }
}
