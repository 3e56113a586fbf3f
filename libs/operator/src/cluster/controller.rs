use crate::cluster::reconcile::reconcile_cluster;
use crate::controller::{error_policy, ControllerId, State};
use crate::crd::bundle_deployment::BundleDeployment;
use crate::crd::cluster::Cluster;
use crate::crd::{CLUSTER_NAMESPACE_LABEL, CLUSTER_NAME_LABEL, MANAGED_LABEL};

use futures::StreamExt;
use kube::api::{Api, ListParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use tokio::time::Duration;
use tracing::{error, info};

pub const CONTROLLER_ID: ControllerId = "cluster";

/// Initialize the cluster status controller (given the crd is installed).
pub async fn run(state: State, client: Client) {
    let clusters = Api::<Cluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = state.to_context(client.clone(), CONTROLLER_ID);
    let deployments = Api::<BundleDeployment>::all(client.clone());

    info!(msg = "starting cluster controller");
    let cluster_controller = Controller::new(clusters, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .watches(
            deployments,
            watcher::Config::default().labels(&format!("{MANAGED_LABEL}=true")),
            |deployment: BundleDeployment| {
                let labels = deployment.labels();
                let name = labels.get(CLUSTER_NAME_LABEL)?.clone();
                let namespace = labels.get(CLUSTER_NAMESPACE_LABEL)?.clone();
                Some(ObjectRef::<Cluster>::new(&name).within(&namespace))
            },
        )
        .shutdown_on_signal()
        .run(reconcile_cluster, error_policy, ctx.clone())
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(CONTROLLER_ID, 1);
    cluster_controller.await;
}
