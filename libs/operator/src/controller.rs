use crate::error::Error;
use crate::metrics::{self, Metrics};

use chrono::{DateTime, Utc};
use futures::channel::mpsc::Sender;
use futures::StreamExt;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::Reporter;
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::ResourceExt;
use prometheus_client::registry::Registry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, warn};

pub type ControllerId = &'static str;

/// Requeue policy shared by every controller: conflicts retry fast, other
/// failures back off.
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(name = %obj.name_any(), %error, "reconcile failed");
    ctx.metrics.set_failure(ctx.controller_id, &obj.name_any(), error);
    if error.is_conflict() {
        Action::requeue(Duration::from_secs(1))
    } else {
        Action::requeue(Duration::from_secs(5 * 60))
    }
}

/// Watch a kind whose changes fan out too broadly for per-object mapping
/// and nudge the owning controller into a reconcile-all. Level-triggered
/// reconciliation makes the coarse trigger safe.
pub fn trigger_stream<K>(
    client: Client,
    ctx: Arc<Context>,
    mut reload_tx: Sender<()>,
    kind: &'static str,
) -> impl Future<Output = ()>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let api: Api<K> = Api::all(client);
    watcher(api, watcher::Config::default().any_semantic())
        .default_backoff()
        .for_each(move |event| {
            match event {
                Ok(watcher::Event::Apply(_)) => {
                    ctx.metrics
                        .triggered_inc(ctx.controller_id, metrics::Action::Apply, kind);
                    let _ignored = reload_tx.try_send(());
                }
                Ok(watcher::Event::Delete(_)) => {
                    ctx.metrics
                        .triggered_inc(ctx.controller_id, metrics::Action::Delete, kind);
                    let _ignored = reload_tx.try_send(());
                }
                // initial listing is covered by controller startup
                Ok(_) => {}
                Err(e) => {
                    error!(%e, kind, "unexpected error when watching resource");
                    ctx.metrics.watch_operations_failed_inc(ctx.controller_id);
                }
            }
            futures::future::ready(())
        })
}

/// Context injected into each reconcile invocation.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Which controller this context belongs to, for metric labels
    pub controller_id: ControllerId,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Arc<Metrics>,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "flotilla-controller".into(),
        }
    }
}

/// State shared between the controllers and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    registry: Arc<Registry>,
}

impl State {
    pub fn new(mut registry: Registry) -> Self {
        let metrics = Metrics::default().register(&mut registry);
        Self {
            diagnostics: Arc::default(),
            metrics: Arc::new(metrics),
            registry: Arc::new(registry),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context(&self, client: Client, controller_id: ControllerId) -> Arc<Context> {
        Arc::new(Context {
            client,
            controller_id,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new(Registry::default())
    }
}
