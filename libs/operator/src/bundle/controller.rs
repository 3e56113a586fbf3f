use crate::bundle::reconcile::reconcile_bundle;
use crate::controller::{error_policy, trigger_stream, ControllerId, State};
use crate::crd::bundle::Bundle;
use crate::crd::bundle_deployment::BundleDeployment;
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::ClusterGroup;
use crate::crd::namespace_mapping::BundleNamespaceMapping;
use crate::crd::{BUNDLE_NAMESPACE_LABEL, BUNDLE_NAME_LABEL, MANAGED_LABEL};

use futures::StreamExt;
use kube::api::{Api, ListParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use tokio::time::Duration;
use tracing::{error, info};

pub const CONTROLLER_ID: ControllerId = "bundle";

const RELOAD_BUFFER_SIZE: usize = 16;

/// Initialize the bundle controller (given the crd is installed).
pub async fn run(state: State, client: Client) {
    let bundles = Api::<Bundle>::all(client.clone());
    if let Err(e) = bundles.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = state.to_context(client.clone(), CONTROLLER_ID);

    // cluster, group and mapping changes can connect any bundle to new
    // clusters, so they reload everything
    let (reload_tx, reload_rx) = futures::channel::mpsc::channel(RELOAD_BUFFER_SIZE);
    let cluster_watch =
        trigger_stream::<Cluster>(client.clone(), ctx.clone(), reload_tx.clone(), "Cluster");
    let group_watch = trigger_stream::<ClusterGroup>(
        client.clone(),
        ctx.clone(),
        reload_tx.clone(),
        "ClusterGroup",
    );
    let mapping_watch = trigger_stream::<BundleNamespaceMapping>(
        client.clone(),
        ctx.clone(),
        reload_tx,
        "BundleNamespaceMapping",
    );

    let deployments = Api::<BundleDeployment>::all(client.clone());

    info!(msg = "starting bundle controller");
    let bundle_controller = Controller::new(bundles, watcher::Config::default().any_semantic())
        // debounce to filter out reconcile calls in quick succession
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .watches(
            deployments,
            watcher::Config::default().labels(&format!("{MANAGED_LABEL}=true")),
            |deployment: BundleDeployment| {
                // labels carry the back-reference to the owning bundle
                let labels = deployment.labels();
                let name = labels.get(BUNDLE_NAME_LABEL)?.clone();
                let namespace = labels.get(BUNDLE_NAMESPACE_LABEL)?.clone();
                Some(ObjectRef::<Bundle>::new(&name).within(&namespace))
            },
        )
        .reconcile_all_on(reload_rx)
        .shutdown_on_signal()
        .run(reconcile_bundle, error_policy, ctx.clone())
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(CONTROLLER_ID, 1);
    tokio::select! {
        _ = bundle_controller => {}
        _ = cluster_watch => {}
        _ = group_watch => {}
        _ = mapping_watch => {}
    }
}
