use crate::crd::bundle::BundleStatus;
use crate::crd::bundle_deployment::BundleDeployment;
use crate::crd::summary::{BundleState, NonReadyResource, Summary};
use crate::crd::{DEPLOYED_CONDITION, MONITORED_CONDITION};
use crate::rollout::partition::Partition;
use crate::target::Target;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// How many non-ready examples a summary keeps.
pub const MAX_NON_READY: usize = 10;

/// State of one deployment record as observed by the deployer, worst drift
/// first: an unapplied id outranks readiness, readiness outranks staging
/// lag, staging lag outranks drift.
pub fn deployment_state(deployment: &BundleDeployment) -> BundleState {
    let status = deployment.status.clone().unwrap_or_default();
    if status.applied_deployment_id != deployment.spec.deployment_id {
        if condition_false(&status.conditions, DEPLOYED_CONDITION) {
            return BundleState::ErrApplied;
        }
        return BundleState::WaitApplied;
    }
    if !status.ready {
        return BundleState::NotReady;
    }
    if deployment.spec.deployment_id != deployment.spec.staged_deployment_id {
        return BundleState::OutOfSync;
    }
    if !status.non_modified {
        return BundleState::Modified;
    }
    BundleState::Ready
}

pub fn target_state(target: &Target) -> BundleState {
    match &target.deployment {
        Some(deployment) => deployment_state(deployment),
        None => BundleState::Pending,
    }
}

/// Human-oriented explanation for a non-ready deployment, from the false
/// deployer conditions and the per-resource wait reasons.
pub fn deployment_message(deployment: &BundleDeployment) -> String {
    let status = deployment.status.clone().unwrap_or_default();
    let mut parts: Vec<String> = Vec::new();
    for name in [DEPLOYED_CONDITION, MONITORED_CONDITION] {
        if let Some(condition) = status.conditions.iter().find(|c| c.type_ == name) {
            if condition.status == "False" && !condition.message.is_empty() {
                parts.push(condition.message.clone());
            }
        }
    }
    for non_ready in &status.non_ready_status {
        for message in &non_ready.summary.message {
            parts.push(format!("{} {}: {}", non_ready.kind, non_ready.name, message));
        }
    }
    parts.join("; ")
}

fn condition_false(conditions: &[Condition], name: &str) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == name && condition.status == "False")
}

/// Count one target into a summary, recording a bounded example when it is
/// not ready. The example carries the cluster name.
pub fn increment(summary: &mut Summary, target: &Target) {
    match &target.deployment {
        Some(deployment) => increment_deployment(summary, deployment, &target.cluster_name()),
        None => {
            summary.desired_ready += 1;
            summary.pending += 1;
            push_example(
                summary,
                NonReadyResource {
                    name: target.cluster_name(),
                    state: BundleState::Pending,
                    ..NonReadyResource::default()
                },
            );
        }
    }
}

/// Count one deployment record into a summary under the given example name
/// (cluster rollups use the bundle name here).
pub fn increment_deployment(summary: &mut Summary, deployment: &BundleDeployment, name: &str) {
    let state = deployment_state(deployment);
    summary.desired_ready += 1;
    match state {
        BundleState::Ready => summary.ready += 1,
        BundleState::Pending => summary.pending += 1,
        BundleState::WaitApplied => summary.wait_applied += 1,
        BundleState::NotReady => summary.not_ready += 1,
        BundleState::OutOfSync => summary.out_of_sync += 1,
        BundleState::Modified => summary.modified += 1,
        BundleState::ErrApplied => summary.err_applied += 1,
    }
    if state == BundleState::Ready {
        return;
    }
    let status = deployment.status.clone().unwrap_or_default();
    push_example(
        summary,
        NonReadyResource {
            name: name.to_string(),
            state,
            message: deployment_message(deployment),
            modified_status: status.modified_status,
            non_ready_status: status.non_ready_status,
        },
    );
}

fn push_example(summary: &mut Summary, example: NonReadyResource) {
    if summary.non_ready_resources.len() < MAX_NON_READY {
        summary.non_ready_resources.push(example);
    }
}

/// Fold one summary into another (cluster and group rollups).
pub fn add(dst: &mut Summary, src: &Summary) {
    dst.ready += src.ready;
    dst.desired_ready += src.desired_ready;
    dst.wait_applied += src.wait_applied;
    dst.err_applied += src.err_applied;
    dst.out_of_sync += src.out_of_sync;
    dst.modified += src.modified;
    dst.not_ready += src.not_ready;
    dst.pending += src.pending;
    for example in &src.non_ready_resources {
        if dst.non_ready_resources.len() >= MAX_NON_READY {
            break;
        }
        dst.non_ready_resources.push(example.clone());
    }
}

/// Worst state present in the summary; Ready when every counter but
/// `ready` is zero.
pub fn summary_state(summary: &Summary) -> BundleState {
    let buckets = [
        (BundleState::ErrApplied, summary.err_applied),
        (BundleState::Modified, summary.modified),
        (BundleState::OutOfSync, summary.out_of_sync),
        (BundleState::NotReady, summary.not_ready),
        (BundleState::WaitApplied, summary.wait_applied),
        (BundleState::Pending, summary.pending),
    ];
    for (state, count) in buckets {
        if count > 0 {
            return state;
        }
    }
    BundleState::Ready
}

pub fn ready_clusters(summary: &Summary) -> String {
    format!("{}/{}", summary.ready, summary.desired_ready)
}

/// Enumerates the non-ready buckets with their examples, for the Ready
/// condition of a non-ready summary.
pub fn ready_message(summary: &Summary) -> String {
    let buckets = [
        (BundleState::ErrApplied, summary.err_applied),
        (BundleState::Modified, summary.modified),
        (BundleState::OutOfSync, summary.out_of_sync),
        (BundleState::NotReady, summary.not_ready),
        (BundleState::WaitApplied, summary.wait_applied),
        (BundleState::Pending, summary.pending),
    ];
    let mut parts = Vec::new();
    for (state, count) in buckets {
        if count == 0 {
            continue;
        }
        let examples: Vec<String> = summary
            .non_ready_resources
            .iter()
            .filter(|resource| resource.state == state)
            .take(3)
            .map(|resource| {
                if resource.message.is_empty() {
                    resource.name.clone()
                } else {
                    format!("{}: {}", resource.name, resource.message)
                }
            })
            .collect();
        if examples.is_empty() {
            parts.push(format!("{state}: {count}"));
        } else {
            parts.push(format!("{state}: {count} ({})", examples.join(", ")));
        }
    }
    parts.join("; ")
}

/// Recompute the bundle-level summary, the per-partition summaries and the
/// display block after a scheduling pass.
pub fn update_bundle_summary(
    status: &mut BundleStatus,
    targets: &[Target],
    partitions: &[Partition],
) {
    let mut summary = Summary::default();
    for target in targets {
        increment(&mut summary, target);
    }
    for (partition, slot) in partitions.iter().zip(status.partitions.iter_mut()) {
        let mut partition_summary = Summary::default();
        for &index in &partition.targets {
            increment(&mut partition_summary, &targets[index]);
        }
        slot.summary = partition_summary;
    }
    status.display.ready_clusters = ready_clusters(&summary);
    status.display.state = summary_state(&summary).to_string();
    status.summary = summary;
}

/// Upsert a condition, keeping the previous transition time when the status
/// value did not change.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status_text = if status { "True" } else { "False" };
    let transition = conditions
        .iter()
        .find(|condition| condition.type_ == type_ && condition.status == status_text)
        .map(|condition| condition.last_transition_time.clone())
        .unwrap_or_else(|| Time(Utc::now()));

    let condition = Condition {
        type_: type_.to_string(),
        status: status_text.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation,
        last_transition_time: transition,
    };
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(slot) => *slot = condition,
        None => conditions.push(condition),
    }
}
