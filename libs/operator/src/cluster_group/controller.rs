use crate::cluster_group::reconcile::reconcile_cluster_group;
use crate::controller::{error_policy, trigger_stream, ControllerId, State};
use crate::crd::cluster::Cluster;
use crate::crd::cluster_group::ClusterGroup;

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher;
use tokio::time::Duration;
use tracing::{error, info};

pub const CONTROLLER_ID: ControllerId = "cluster_group";

const RELOAD_BUFFER_SIZE: usize = 16;

/// Initialize the cluster group status controller (given the crd is
/// installed).
pub async fn run(state: State, client: Client) {
    let groups = Api::<ClusterGroup>::all(client.clone());
    if let Err(e) = groups.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = state.to_context(client.clone(), CONTROLLER_ID);

    // any cluster status change can move a group's summary
    let (reload_tx, reload_rx) = futures::channel::mpsc::channel(RELOAD_BUFFER_SIZE);
    let cluster_watch =
        trigger_stream::<Cluster>(client.clone(), ctx.clone(), reload_tx, "Cluster");

    info!(msg = "starting cluster group controller");
    let group_controller = Controller::new(groups, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .reconcile_all_on(reload_rx)
        .shutdown_on_signal()
        .run(reconcile_cluster_group, error_policy, ctx.clone())
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(CONTROLLER_ID, 1);
    tokio::select! {
        _ = group_controller => {}
        _ = cluster_watch => {}
    }
}
