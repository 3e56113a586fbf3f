use crate::cluster::controller::CONTROLLER_ID;
use crate::controller::Context;
use crate::crd::cluster::{Cluster, ClusterStatus};
use crate::crd::bundle_deployment::BundleDeployment;
use crate::crd::summary::Summary;
use crate::crd::{CLUSTER_NAMESPACE_LABEL, CLUSTER_NAME_LABEL, READY_CONDITION};
use crate::error::{Error, Result};
use crate::{status, telemetry};

use chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, instrument, Span};

/// Roll the cluster's bundle deployments up into its status summary.
#[instrument(skip(ctx, cluster), fields(trace_id))]
pub async fn reconcile_cluster(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = cluster.namespace().ok_or_else(|| {
        Error::UserInputError("Expected Cluster resource to be namespaced".to_owned())
    })?;
    let Some(downstream) = cluster
        .status
        .as_ref()
        .and_then(|status| status.namespace.clone())
    else {
        // registration has not assigned a namespace yet
        return Ok(Action::requeue(Duration::from_secs(60)));
    };

    let selector = format!(
        "{CLUSTER_NAME_LABEL}={},{CLUSTER_NAMESPACE_LABEL}={namespace}",
        cluster.name_any()
    );
    let deployments = Api::<BundleDeployment>::namespaced(ctx.client.clone(), &downstream)
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?;

    let mut summary = Summary::default();
    for deployment in &deployments.items {
        status::increment_deployment(&mut summary, deployment, &deployment.name_any());
    }

    let mut new_status = cluster.status.clone().unwrap_or_default();
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
        cluster.metadata.generation,
    );
    new_status.conditions = conditions;
    new_status.display.ready_bundles = status::ready_clusters(&summary);
    new_status.display.state = status::summary_state(&summary).to_string();
    new_status.summary = summary;

    patch_status(&ctx, &cluster, &namespace, new_status).await?;
    Ok(Action::requeue(Duration::from_secs(15 * 60)))
}

async fn patch_status(
    ctx: &Context,
    cluster: &Cluster,
    namespace: &str,
    new_status: ClusterStatus,
) -> Result<()> {
    let current = serde_json::to_value(&cluster.status).map_err(Error::SerializationError)?;
    let desired = serde_json::to_value(Some(&new_status)).map_err(Error::SerializationError)?;
    if current == desired {
        return Ok(());
    }
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({
        "apiVersion": "flotilla.dev/v1alpha1",
        "kind": "Cluster",
        "status": new_status,
    });
    api.patch_status(
        &cluster.name_any(),
        &PatchParams::apply("flotilla").force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}
