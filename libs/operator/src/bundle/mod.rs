pub mod controller;
pub mod reconcile;

#[cfg(test)]
mod test {
    use crate::bundle::reconcile::{reconcile_bundle, BUNDLE_FINALIZER};
    use crate::controller::Context;
    use crate::crd::bundle::{Bundle, BundleResource, BundleSpec, BundleStatus};
    use crate::crd::bundle_deployment::{BundleDeployment, BundleDeploymentStatus};
    use crate::crd::cluster::{Cluster, ClusterSpec, ClusterStatus};
    use crate::crd::content::{Content, ContentSpec};
    use crate::crd::summary::Summary;
    use crate::error::Result;
    use crate::manifest;
    use crate::rollout::{partition, schedule};
    use crate::status;
    use crate::target;

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use http::{Request, Response};
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use kube::client::Body;
    use kube::{Client, Resource, ResourceExt};
    use serde_json::json;

    fn test_bundle() -> Bundle {
        let mut bundle = Bundle::new(
            "app",
            BundleSpec {
                resources: vec![BundleResource {
                    name: Some("cm.yaml".to_string()),
                    content: "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n"
                        .to_string(),
                    encoding: None,
                }],
                targets: vec![crate::target::fixtures::selector_target(&[("env", "dev")])],
                ..BundleSpec::default()
            },
        );
        bundle.meta_mut().namespace = Some("fleet-local".to_string());
        bundle
    }

    fn finalized(mut bundle: Bundle) -> Bundle {
        bundle.finalizers_mut().push(BUNDLE_FINALIZER.to_string());
        bundle
    }

    fn test_cluster() -> Cluster {
        let mut cluster = Cluster::new("local", ClusterSpec::default());
        cluster.meta_mut().namespace = Some("fleet-local".to_string());
        cluster.meta_mut().labels = Some(BTreeMap::from([("env".to_string(), "dev".to_string())]));
        cluster.status = Some(ClusterStatus {
            namespace: Some("cluster-fleet-local-local".to_string()),
            ..ClusterStatus::default()
        });
        cluster
    }

    /// The deployment record the reconciler should produce for the test
    /// bundle on the test cluster, derived through the same pure pipeline.
    fn expected_deployment(reported_ready: bool) -> BundleDeployment {
        let bundle = test_bundle();
        let payload = manifest::serialize_resources(&bundle.spec.resources).unwrap();
        let manifest_id = manifest::content_key(&manifest::sha256_hex(&payload));
        let mut targets =
            target::resolve_targets(&bundle, &[test_cluster()], &[], &manifest_id).unwrap();
        let mut parts = partition::partitions(None, &targets);
        let mut status = BundleStatus::default();
        schedule::schedule(&bundle, &mut targets, &mut parts, &mut status);
        let mut deployment = targets.remove(0).deployment.unwrap();
        if reported_ready {
            deployment.metadata.uid = Some("bd-uid".to_string());
            deployment.metadata.resource_version = Some("1".to_string());
            deployment.status = Some(BundleDeploymentStatus {
                applied_deployment_id: deployment.spec.deployment_id.clone(),
                ready: true,
                non_modified: true,
                ..BundleDeploymentStatus::default()
            });
        }
        deployment
    }

    /// Bundle status after a converged reconcile, for the no-op scenario.
    fn settled_status(bundle: &Bundle) -> BundleStatus {
        let payload = manifest::serialize_resources(&bundle.spec.resources).unwrap();
        let manifest_id = manifest::content_key(&manifest::sha256_hex(&payload));
        let mut targets =
            target::resolve_targets(bundle, &[test_cluster()], &[], &manifest_id).unwrap();
        target::attach_deployments(&mut targets, vec![expected_deployment(true)]);
        let mut parts = partition::partitions(None, &targets);
        let mut status = BundleStatus::default();
        schedule::schedule(bundle, &mut targets, &mut parts, &mut status);
        status.observed_generation = bundle.metadata.generation.unwrap_or_default();
        status.resource_key = crate::resources::resource_keys(bundle);
        status::update_bundle_summary(&mut status, &targets, &parts);
        let mut conditions = Vec::new();
        status::set_condition(
            &mut conditions,
            crate::crd::READY_CONDITION,
            true,
            "Ready",
            "",
            bundle.metadata.generation,
        );
        status.conditions = conditions;
        status
    }

    fn stored_content(bundle: &Bundle) -> Content {
        let payload = manifest::serialize_resources(&bundle.spec.resources).unwrap();
        let digest = manifest::sha256_hex(&payload);
        Content {
            metadata: ObjectMeta {
                name: Some(manifest::content_key(&digest)),
                ..ObjectMeta::default()
            },
            spec: ContentSpec {
                content: Some(ByteString(manifest::compress(&payload).unwrap())),
                sha256sum: digest,
            },
        }
    }

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
    pub struct ApiServerVerifier(ApiServerHandle);

    /// Scenarios with matching scripted handlers. If the reconciler makes
    /// more calls than the scenario answers, the test sees a
    /// `KubeError(Service(Closed(())))`; a missing call trips the timeout.
    pub enum Scenario {
        /// bundles without our finalizer only get the finalizer patch
        FinalizerCreation,
        /// first pass over a fresh bundle: content + deployment + status
        FreshBundleRollout,
        /// converged bundle: reads only, no writes
        NoOpReconcile(Bundle),
        /// template failure surfaces on the Ready condition
        TargetingError(Bundle),
        /// deleting bundle: descendant deployments go, then the finalizer
        Cleanup,
    }

    pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    impl ApiServerVerifier {
        pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
            tokio::spawn(async move {
                match scenario {
                    Scenario::FinalizerCreation => self.handle_finalizer_creation().await,
                    Scenario::FreshBundleRollout => {
                        self.handle_content_miss_for(&test_bundle())
                            .await
                            .unwrap()
                            .handle_target_reads(Vec::new())
                            .await
                            .unwrap()
                            .handle_deployment_create()
                            .await
                            .unwrap()
                            .handle_status_patch()
                            .await
                    }
                    Scenario::NoOpReconcile(bundle) => {
                        self.handle_content_hit(&bundle)
                            .await
                            .unwrap()
                            .handle_target_reads(vec![expected_deployment(true)])
                            .await
                    }
                    Scenario::TargetingError(bundle) => {
                        self.handle_content_miss_for(&bundle)
                            .await
                            .unwrap()
                            .handle_target_reads(Vec::new())
                            .await
                            .unwrap()
                            .handle_error_status_patch()
                            .await
                    }
                    Scenario::Cleanup => self.handle_cleanup().await,
                }
                .expect("scenario completed without errors");
            })
        }

        async fn next(&mut self) -> (Request<Body>, tower_test::mock::SendResponse<Response<Body>>) {
            self.0.next_request().await.expect("service not called")
        }

        fn send(
            send: tower_test::mock::SendResponse<Response<Body>>,
            status: u16,
            body: serde_json::Value,
        ) {
            send.send_response(
                Response::builder()
                    .status(status)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            );
        }

        fn list_of(items: Vec<serde_json::Value>, kind: &str) -> serde_json::Value {
            json!({
                "apiVersion": "flotilla.dev/v1alpha1",
                "kind": kind,
                "metadata": { "resourceVersion": "1" },
                "items": items,
            })
        }

        async fn handle_finalizer_creation(mut self) -> Result<Self> {
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/bundles/app"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert!(patch.to_string().contains(BUNDLE_FINALIZER));
            Self::send(
                send,
                200,
                serde_json::to_value(finalized(test_bundle())).unwrap(),
            );
            Ok(self)
        }

        async fn handle_content_miss_for(mut self, bundle: &Bundle) -> Result<Self> {
            let content = stored_content(bundle);
            let key = content.name_any();

            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(
                request.uri().path(),
                format!("/apis/flotilla.dev/v1alpha1/contents/{key}")
            );
            Self::send(
                send,
                404,
                json!({
                    "kind": "Status", "apiVersion": "v1", "status": "Failure",
                    "reason": "NotFound", "code": 404
                }),
            );

            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::POST);
            assert_eq!(request.uri().path(), "/apis/flotilla.dev/v1alpha1/contents");
            Self::send(send, 201, serde_json::to_value(&content).unwrap());
            Ok(self)
        }

        async fn handle_content_hit(mut self, bundle: &Bundle) -> Result<Self> {
            let content = stored_content(bundle);
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::GET);
            Self::send(send, 200, serde_json::to_value(&content).unwrap());
            Ok(self)
        }

        /// Answers the input-gathering reads: mappings, clusters, groups,
        /// existing deployments.
        async fn handle_target_reads(
            mut self,
            deployments: Vec<BundleDeployment>,
        ) -> Result<Self> {
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/bundlenamespacemappings"
            );
            Self::send(send, 200, Self::list_of(vec![], "BundleNamespaceMappingList"));

            let (request, send) = self.next().await;
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/clusters"
            );
            Self::send(
                send,
                200,
                Self::list_of(
                    vec![serde_json::to_value(test_cluster()).unwrap()],
                    "ClusterList",
                ),
            );

            let (request, send) = self.next().await;
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/clustergroups"
            );
            Self::send(send, 200, Self::list_of(vec![], "ClusterGroupList"));

            let (request, send) = self.next().await;
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/bundledeployments"
            );
            assert!(request
                .uri()
                .query()
                .unwrap_or_default()
                .contains("labelSelector"));
            let items = deployments
                .into_iter()
                .map(|deployment| serde_json::to_value(deployment).unwrap())
                .collect();
            Self::send(send, 200, Self::list_of(items, "BundleDeploymentList"));
            Ok(self)
        }

        async fn handle_deployment_create(mut self) -> Result<Self> {
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::POST);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/cluster-fleet-local-local/bundledeployments"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let deployment: BundleDeployment = serde_json::from_slice(&body).unwrap();
            let expected = expected_deployment(false);
            assert_eq!(deployment.spec.deployment_id, expected.spec.deployment_id);
            assert_eq!(
                deployment.spec.staged_deployment_id,
                deployment.spec.deployment_id,
                "fresh deployments promote immediately"
            );
            assert_eq!(deployment.labels(), expected.labels());
            Self::send(send, 201, serde_json::to_value(&deployment).unwrap());
            Ok(self)
        }

        async fn handle_status_patch(mut self) -> Result<Self> {
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/bundles/app/status"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let summary: Summary =
                serde_json::from_value(patch["status"]["summary"].clone()).unwrap();
            assert_eq!(summary.desired_ready, 1);
            // the deployer has not reported yet
            assert_eq!(summary.ready, 0);
            assert_eq!(summary.wait_applied, 1);
            assert_eq!(patch["status"]["display"]["readyClusters"], "0/1");

            let mut bundle = finalized(test_bundle());
            bundle.status = serde_json::from_value(patch["status"].clone()).ok();
            Self::send(send, 200, serde_json::to_value(&bundle).unwrap());
            Ok(self)
        }

        async fn handle_error_status_patch(mut self) -> Result<Self> {
            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/bundles/app/status"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let condition = &patch["status"]["conditions"][0];
            assert_eq!(condition["type"], "Ready");
            assert_eq!(condition["status"], "False");
            assert!(condition["message"]
                .as_str()
                .unwrap()
                .contains("Targeting error"));

            let mut bundle = finalized(test_bundle());
            bundle.status = serde_json::from_value(patch["status"].clone()).ok();
            Self::send(send, 200, serde_json::to_value(&bundle).unwrap());
            Ok(self)
        }

        async fn handle_cleanup(mut self) -> Result<Self> {
            let deployment = expected_deployment(true);

            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/bundledeployments"
            );
            Self::send(
                send,
                200,
                Self::list_of(
                    vec![serde_json::to_value(&deployment).unwrap()],
                    "BundleDeploymentList",
                ),
            );

            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::DELETE);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/cluster-fleet-local-local/bundledeployments/app"
            );
            Self::send(send, 200, serde_json::to_value(&deployment).unwrap());

            let (request, send) = self.next().await;
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/flotilla.dev/v1alpha1/namespaces/fleet-local/bundles/app"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert!(patch.to_string().contains("remove"));
            Self::send(send, 200, serde_json::to_value(test_bundle()).unwrap());
            Ok(self)
        }
    }

    impl Context {
        pub fn test() -> (Arc<Self>, ApiServerVerifier) {
            let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
            let mock_client = Client::new(mock_service, "default");
            let ctx = crate::controller::State::default()
                .to_context(mock_client, crate::bundle::controller::CONTROLLER_ID);
            (ctx, ApiServerVerifier(handle))
        }
    }

    #[tokio::test]
    async fn fresh_bundle_gets_finalizer_first() {
        let (ctx, api) = Context::test();
        let bundle = Arc::new(test_bundle());
        let mocksrv = api.run(Scenario::FinalizerCreation);
        reconcile_bundle(bundle, ctx).await.expect("reconciler");
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn finalized_bundle_rolls_out() {
        let (ctx, api) = Context::test();
        let bundle = Arc::new(finalized(test_bundle()));
        let mocksrv = api.run(Scenario::FreshBundleRollout);
        reconcile_bundle(bundle, ctx).await.expect("reconciler");
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn second_reconcile_performs_no_writes() {
        let mut bundle = finalized(test_bundle());
        bundle.status = Some(settled_status(&bundle));

        let (ctx, api) = Context::test();
        let mocksrv = api.run(Scenario::NoOpReconcile(bundle.clone()));
        reconcile_bundle(Arc::new(bundle), ctx).await.expect("reconciler");
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn template_failure_surfaces_as_targeting_error() {
        use crate::crd::options::{BundleDeploymentOptions, HelmOptions};
        use crate::error::Error;

        let mut bundle = finalized(test_bundle());
        let serde_json::Value::Object(values) =
            json!({ "name": "${ ClusterLabels.missing }" })
        else {
            unreachable!()
        };
        bundle.spec.defaults = BundleDeploymentOptions {
            helm: Some(HelmOptions {
                values: Some(values),
                ..HelmOptions::default()
            }),
            ..BundleDeploymentOptions::default()
        };

        let (ctx, api) = Context::test();
        let mocksrv = api.run(Scenario::TargetingError(bundle.clone()));
        let result = reconcile_bundle(Arc::new(bundle), ctx).await;
        assert!(matches!(
            result,
            Err(Error::FinalizerError(_)) | Err(Error::TemplateError(_))
        ));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn deleted_bundle_cleans_up_descendants() {
        use chrono::{TimeZone, Utc};
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

        let mut bundle = finalized(test_bundle());
        bundle.meta_mut().deletion_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2024, 4, 2, 12, 50, 32).unwrap()));

        let (ctx, api) = Context::test();
        let mocksrv = api.run(Scenario::Cleanup);
        reconcile_bundle(Arc::new(bundle), ctx).await.expect("reconciler");
        timeout_after_1s(mocksrv).await;
    }
}
