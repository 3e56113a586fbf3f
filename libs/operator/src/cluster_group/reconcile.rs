use crate::cluster_group::controller::CONTROLLER_ID;
use crate::controller::Context;
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::{ClusterGroup, ClusterGroupStatus};
use crate::crd::summary::Summary;
use crate::crd::READY_CONDITION;
use crate::error::{Error, Result};
use crate::{selector, status, telemetry};

use chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::SelectorExt;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, instrument, warn, Span};

/// Sum the summaries of every cluster the group's selector matches.
#[instrument(skip(ctx, group), fields(trace_id))]
pub async fn reconcile_cluster_group(
    group: Arc<ClusterGroup>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = group.namespace().ok_or_else(|| {
        Error::UserInputError("Expected ClusterGroup resource to be namespaced".to_owned())
    })?;

    let compiled = match &group.spec.selector {
        Some(label_selector) => match selector::compile(label_selector) {
            Ok(compiled) => Some(compiled),
            Err(error) => {
                // surface on the condition; nothing to retry until the spec changes
                warn!(group = %group.name_any(), %error, "invalid cluster group selector");
                let mut new_status = group.status.clone().unwrap_or_default();
                let mut conditions = std::mem::take(&mut new_status.conditions);
                status::set_condition(
                    &mut conditions,
                    READY_CONDITION,
                    false,
                    "InvalidSelector",
                    &error.to_string(),
                    group.metadata.generation,
                );
                new_status.conditions = conditions;
                patch_status(&ctx, &group, &namespace, new_status).await?;
                return Ok(Action::await_change());
            }
        },
        None => None,
    };

    let clusters = Api::<Cluster>::namespaced(ctx.client.clone(), &namespace)
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    let mut summary = Summary::default();
    let mut cluster_count = 0;
    let mut non_ready_cluster_count = 0;
    for cluster in &clusters.items {
        let matches = compiled
            .as_ref()
            .map(|compiled| compiled.matches(cluster.labels()))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        cluster_count += 1;
        if let Some(cluster_status) = &cluster.status {
            if cluster_status.summary.ready != cluster_status.summary.desired_ready {
                non_ready_cluster_count += 1;
            }
            status::add(&mut summary, &cluster_status.summary);
        }
    }

    let mut new_status = group.status.clone().unwrap_or_default();
    let ready = summary.desired_ready == summary.ready;
    let message = if ready {
        String::new()
    } else {
        status::ready_message(&summary)
    };
    let mut conditions = std::mem::take(&mut new_status.conditions);
    status::set_condition(
        &mut conditions,
        READY_CONDITION,
        ready,
        if ready { "Ready" } else { "NotReady" },
        &message,
        group.metadata.generation,
    );
    new_status.conditions = conditions;
    new_status.cluster_count = cluster_count;
    new_status.non_ready_cluster_count = non_ready_cluster_count;
    new_status.display.ready_clusters =
        format!("{}/{cluster_count}", cluster_count - non_ready_cluster_count);
    new_status.display.state = status::summary_state(&summary).to_string();
    new_status.summary = summary;

    patch_status(&ctx, &group, &namespace, new_status).await?;
    Ok(Action::requeue(Duration::from_secs(15 * 60)))
}

async fn patch_status(
    ctx: &Context,
    group: &ClusterGroup,
    namespace: &str,
    new_status: ClusterGroupStatus,
) -> Result<()> {
    let current = serde_json::to_value(&group.status).map_err(Error::SerializationError)?;
    let desired = serde_json::to_value(Some(&new_status)).map_err(Error::SerializationError)?;
    if current == desired {
        return Ok(());
    }
    let api: Api<ClusterGroup> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({
        "apiVersion": "flotilla.dev/v1alpha1",
        "kind": "ClusterGroup",
        "status": new_status,
    });
    api.patch_status(
        &group.name_any(),
        &PatchParams::apply("flotilla").force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}
