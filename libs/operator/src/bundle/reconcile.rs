use crate::bundle::controller::CONTROLLER_ID;
use crate::controller::Context;
use crate::crd::bundle::{Bundle, BundleStatus};
use crate::crd::bundle_deployment::BundleDeployment;
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::ClusterGroup;
use crate::crd::namespace_mapping::BundleNamespaceMapping;
use crate::crd::{BUNDLE_NAMESPACE_LABEL, BUNDLE_NAME_LABEL, READY_CONDITION};
use crate::error::{Error, Result};
use crate::rollout::{partition, schedule};
use crate::store::ContentStore;
use crate::target::{self, Target};
use crate::{manifest, options, resources, status, telemetry, values};

use chrono::Utc;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

pub static BUNDLE_FINALIZER: &str = "flotilla.dev/bundle";

/// Level-triggered entry point. Recomputes the full desired target list and
/// converges deployment records; an already-satisfied state performs no
/// writes.
#[instrument(skip(ctx, bundle), fields(trace_id))]
pub async fn reconcile_bundle(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = bundle.namespace().ok_or_else(|| {
        Error::UserInputError("Expected Bundle resource to be namespaced".to_owned())
    })?;
    let bundles: Api<Bundle> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling Bundle \"{}\" in {namespace}", bundle.name_any());

    // The finalizer guarantees descendant deployments are removed before
    // the bundle itself goes away.
    finalizer(&bundles, BUNDLE_FINALIZER, bundle, |event| async {
        match event {
            FinalizerEvent::Apply(bundle) => apply(bundle, ctx.clone()).await,
            FinalizerEvent::Cleanup(bundle) => cleanup(bundle, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action> {
    let client = ctx.client.clone();
    let namespace = bundle.namespace().unwrap_or_default();

    // content first: deployments reference the manifest by digest
    let payload = manifest::serialize_resources(&bundle.spec.resources)?;
    let digest = manifest::sha256_hex(&payload);
    let manifest_id = manifest::content_key(&digest);
    ContentStore::new(client.clone())
        .ensure(&manifest_id, &digest, &payload)
        .await?;

    let inputs = gather(&client, &bundle, &namespace).await?;

    match build_targets(&client, &bundle, &inputs, &manifest_id).await {
        Ok(mut targets) => {
            let mut partitions =
                partition::partitions(bundle.spec.rollout_strategy.as_ref(), &targets);
            let mut status = BundleStatus::default();
            schedule::schedule(&bundle, &mut targets, &mut partitions, &mut status);

            converge_deployments(&client, &targets, &inputs.deployments).await?;

            status.observed_generation = bundle.metadata.generation.unwrap_or_default();
            status.resource_key = resources::resource_keys(&bundle);
            status::update_bundle_summary(&mut status, &targets, &partitions);

            let ready = status.summary.desired_ready == status.summary.ready;
            let message = if ready {
                String::new()
            } else {
                status::ready_message(&status.summary)
            };
            let mut conditions = bundle
                .status
                .clone()
                .map(|status| status.conditions)
                .unwrap_or_default();
            status::set_condition(
                &mut conditions,
                READY_CONDITION,
                ready,
                if ready { "Ready" } else { "NotReady" },
                &message,
                bundle.metadata.generation,
            );
            status.conditions = conditions;

            patch_status(&client, &bundle, &namespace, status).await?;
            Ok(Action::requeue(Duration::from_secs(15 * 60)))
        }
        Err(error) => {
            warn!(%error, "targeting failed");
            let mut status = bundle.status.clone().unwrap_or_default();
            status.observed_generation = bundle.metadata.generation.unwrap_or_default();
            let mut conditions = std::mem::take(&mut status.conditions);
            status::set_condition(
                &mut conditions,
                READY_CONDITION,
                false,
                "TargetingError",
                &format!("Targeting error: {error}"),
                bundle.metadata.generation,
            );
            status.conditions = conditions;
            if let Err(patch_error) = patch_status(&client, &bundle, &namespace, status).await {
                warn!(%patch_error, "failed to record targeting error");
            }
            Err(error)
        }
    }
}

/// Remove every deployment record labeled for this bundle, then let the
/// finalizer go.
async fn cleanup(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action> {
    let client = ctx.client.clone();
    let namespace = bundle.namespace().unwrap_or_default();

    let selector = format!(
        "{BUNDLE_NAME_LABEL}={},{BUNDLE_NAMESPACE_LABEL}={namespace}",
        bundle.name_any()
    );
    let deployments = Api::<BundleDeployment>::all(client.clone())
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?;

    for deployment in &deployments.items {
        let Some(deployment_namespace) = deployment.namespace() else {
            continue;
        };
        let api: Api<BundleDeployment> = Api::namespaced(client.clone(), &deployment_namespace);
        match api
            .delete(&deployment.name_any(), &Default::default())
            .await
        {
            Ok(_) => info!(
                namespace = deployment_namespace,
                name = %deployment.name_any(),
                "deleted descendant deployment"
            ),
            // already gone, which is what we wanted
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(Action::await_change())
}

struct Inputs {
    clusters: Vec<Cluster>,
    groups: Vec<ClusterGroup>,
    deployments: Vec<BundleDeployment>,
}

/// Everything a pass needs: clusters and groups from the bundle's own
/// namespace plus any mapping-contributed ones, and the bundle's existing
/// deployment records.
async fn gather(client: &Client, bundle: &Bundle, namespace: &str) -> Result<Inputs> {
    let mut namespaces: BTreeSet<String> = BTreeSet::from([namespace.to_string()]);

    let mappings = Api::<BundleNamespaceMapping>::namespaced(client.clone(), namespace)
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    if !mappings.items.is_empty() {
        let all_namespaces = Api::<Namespace>::all(client.clone())
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        for mapping in &mappings.items {
            match target::mapping_namespaces(mapping, bundle, &all_namespaces.items) {
                Ok(extra) => namespaces.extend(extra),
                Err(error) => {
                    warn!(mapping = %mapping.name_any(), %error, "skipping namespace mapping")
                }
            }
        }
    }

    let mut clusters = Vec::new();
    let mut groups = Vec::new();
    for candidate in &namespaces {
        clusters.extend(
            Api::<Cluster>::namespaced(client.clone(), candidate)
                .list(&ListParams::default())
                .await
                .map_err(Error::KubeError)?
                .items,
        );
        groups.extend(
            Api::<ClusterGroup>::namespaced(client.clone(), candidate)
                .list(&ListParams::default())
                .await
                .map_err(Error::KubeError)?
                .items,
        );
    }

    let selector = format!(
        "{BUNDLE_NAME_LABEL}={},{BUNDLE_NAMESPACE_LABEL}={namespace}",
        bundle.name_any()
    );
    let deployments = Api::<BundleDeployment>::all(client.clone())
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?
        .items;

    Ok(Inputs {
        clusters,
        groups,
        deployments,
    })
}

async fn build_targets(
    client: &Client,
    bundle: &Bundle,
    inputs: &Inputs,
    manifest_id: &str,
) -> Result<Vec<Target>> {
    let mut targets =
        target::resolve_targets(bundle, &inputs.clusters, &inputs.groups, manifest_id)?;
    let namespace = bundle.namespace().unwrap_or_default();
    for target in &mut targets {
        // deploy time: external value sources participate in the id
        if values::apply_values_from(client, &namespace, &mut target.options).await? {
            target.deployment_id = options::deployment_id(manifest_id, &target.options)?;
        }
    }
    target::attach_deployments(&mut targets, inputs.deployments.clone());
    Ok(targets)
}

/// Create, update and delete deployment records to match the scheduled
/// targets. Updates go through replace so a lost resource-version race
/// surfaces as Conflict and re-enqueues.
async fn converge_deployments(
    client: &Client,
    targets: &[Target],
    existing: &[BundleDeployment],
) -> Result<()> {
    let originals: HashMap<String, &BundleDeployment> = existing
        .iter()
        .filter_map(|deployment| Some((deployment.namespace()?, deployment)))
        .collect();
    let mut desired: BTreeSet<String> = BTreeSet::new();

    for target in targets {
        let Some(deployment) = &target.deployment else {
            continue;
        };
        let Some(namespace) = deployment.namespace() else {
            continue;
        };
        desired.insert(namespace.clone());
        let api: Api<BundleDeployment> = Api::namespaced(client.clone(), &namespace);

        match originals.get(&namespace) {
            None => match api.create(&PostParams::default(), deployment).await {
                Ok(_) => {
                    info!(namespace, name = %deployment.name_any(), "created deployment")
                }
                // a concurrent reconcile won the race; the next pass converges
                Err(kube::Error::Api(e)) if e.code == 409 => {}
                Err(e) => return Err(Error::KubeError(e)),
            },
            Some(original) => {
                if deployment_changed(original, deployment) {
                    api.replace(&deployment.name_any(), &PostParams::default(), deployment)
                        .await
                        .map_err(Error::KubeError)?;
                    info!(namespace, name = %deployment.name_any(), "updated deployment");
                }
            }
        }
    }

    // clusters that stopped matching leave stale records behind
    for (namespace, deployment) in &originals {
        if desired.contains(namespace) {
            continue;
        }
        let api: Api<BundleDeployment> = Api::namespaced(client.clone(), namespace);
        match api
            .delete(&deployment.name_any(), &Default::default())
            .await
        {
            Ok(_) => info!(namespace, name = %deployment.name_any(), "deleted stale deployment"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(())
}

fn deployment_changed(original: &BundleDeployment, desired: &BundleDeployment) -> bool {
    serde_json::to_value(&original.spec).ok() != serde_json::to_value(&desired.spec).ok()
}

async fn patch_status(
    client: &Client,
    bundle: &Bundle,
    namespace: &str,
    status: BundleStatus,
) -> Result<()> {
    let current = serde_json::to_value(&bundle.status).map_err(Error::SerializationError)?;
    let desired = serde_json::to_value(Some(&status)).map_err(Error::SerializationError)?;
    if current == desired {
        return Ok(());
    }
    let api: Api<Bundle> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({
        "apiVersion": "flotilla.dev/v1alpha1",
        "kind": "Bundle",
        "status": status,
    });
    api.patch_status(
        &bundle.name_any(),
        &PatchParams::apply("flotilla").force(),
        &Patch::Apply(&patch),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}
