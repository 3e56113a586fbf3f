#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use flotilla_operator::crd::bundle::{Bundle, BundleResource, BundleSpec, BundleTarget, TargetCriteria};
    use flotilla_operator::crd::bundle_deployment::BundleDeployment;
    use flotilla_operator::crd::cluster::{Cluster, ClusterSpec};
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, Condition};
    use kube::ResourceExt;
    use serde_json::json;

    const NAMESPACE: &str = "fleet-default";

    fn is_bundle_ready() -> impl Condition<Bundle> {
        |obj: Option<&Bundle>| {
            if let Some(bundle) = &obj {
                if let Some(status) = &bundle.status {
                    return status
                        .conditions
                        .iter()
                        .any(|c| c.type_ == "Ready" && c.status == "True");
                }
            }
            false
        }
    }

    fn deployment_exists() -> impl Condition<BundleDeployment> {
        |obj: Option<&BundleDeployment>| obj.is_some()
    }

    async fn wait_for<R, C>(api: Api<R>, name: &str, condition: C)
    where
        R: kube::Resource
            + Clone
            + std::fmt::Debug
            + for<'de> k8s_openapi::serde::Deserialize<'de>
            + 'static
            + Send,
        C: Condition<R>,
    {
        tokio::time::timeout(
            Duration::from_secs(30),
            await_condition(api, name, condition),
        )
        .await
        .unwrap()
        .unwrap();
    }

    fn test_bundle(name: &str) -> Bundle {
        Bundle::new(
            name,
            BundleSpec {
                resources: vec![BundleResource {
                    name: Some("cm.yaml".to_string()),
                    content: format!(
                        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n"
                    ),
                    encoding: None,
                }],
                targets: vec![BundleTarget {
                    criteria: TargetCriteria {
                        cluster_name: Some("downstream".to_string()),
                        ..TargetCriteria::default()
                    },
                    ..BundleTarget::default()
                }],
                ..BundleSpec::default()
            },
        )
    }

    async fn ensure_cluster(client: &Client) -> String {
        let clusters = Api::<Cluster>::namespaced(client.clone(), NAMESPACE);
        let downstream_namespace = "cluster-fleet-default-downstream".to_string();
        if clusters.get_opt("downstream").await.unwrap().is_none() {
            let cluster = Cluster::new("downstream", ClusterSpec::default());
            clusters
                .create(&PostParams::default(), &cluster)
                .await
                .unwrap();
            // registration normally assigns this; the suite plays that role
            clusters
                .patch_status(
                    "downstream",
                    &PatchParams::apply("e2e-tests").force(),
                    &Patch::Apply(&json!({
                        "apiVersion": "flotilla.dev/v1alpha1",
                        "kind": "Cluster",
                        "status": { "namespace": downstream_namespace }
                    })),
                )
                .await
                .unwrap();
        }
        downstream_namespace
    }

    /// Play the deployer: report the staged id applied and ready.
    async fn report_applied(api: &Api<BundleDeployment>, name: &str) {
        let deployment = api.get(name).await.unwrap();
        api.patch_status(
            name,
            &PatchParams::apply("e2e-tests").force(),
            &Patch::Apply(&json!({
                "apiVersion": "flotilla.dev/v1alpha1",
                "kind": "BundleDeployment",
                "status": {
                    "appliedDeploymentId": deployment.spec.deployment_id,
                    "ready": true,
                    "nonModified": true,
                }
            })),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn bundle_rolls_out_and_reports_ready() {
        let client = Client::try_default().await.unwrap();
        let downstream = ensure_cluster(&client).await;

        let name = "test-rollout";
        let bundles = Api::<Bundle>::namespaced(client.clone(), NAMESPACE);
        bundles
            .create(&PostParams::default(), &test_bundle(name))
            .await
            .unwrap();

        let deployments = Api::<BundleDeployment>::namespaced(client.clone(), &downstream);
        wait_for(deployments.clone(), name, deployment_exists()).await;

        let deployment = deployments.get(name).await.unwrap();
        assert_eq!(
            deployment.spec.staged_deployment_id,
            deployment.spec.deployment_id
        );
        assert!(deployment.spec.deployment_id.starts_with("s-"));

        report_applied(&deployments, name).await;
        wait_for(bundles.clone(), name, is_bundle_ready()).await;

        let bundle = bundles.get(name).await.unwrap();
        let status = bundle.status.unwrap();
        assert_eq!(status.summary.ready, 1);
        assert_eq!(status.summary.desired_ready, 1);
        assert_eq!(status.display.ready_clusters, "1/1");
    }

    #[tokio::test]
    async fn bundle_delete_removes_deployments() {
        let client = Client::try_default().await.unwrap();
        let downstream = ensure_cluster(&client).await;

        let name = "test-delete";
        let bundles = Api::<Bundle>::namespaced(client.clone(), NAMESPACE);
        bundles
            .create(&PostParams::default(), &test_bundle(name))
            .await
            .unwrap();

        let deployments = Api::<BundleDeployment>::namespaced(client.clone(), &downstream);
        wait_for(deployments.clone(), name, deployment_exists()).await;
        let deployment = deployments.get(name).await.unwrap();

        bundles.delete(name, &Default::default()).await.unwrap();
        wait_for(
            deployments,
            name,
            kube::runtime::wait::conditions::is_deleted(&deployment.uid().unwrap()),
        )
        .await;
    }
}
