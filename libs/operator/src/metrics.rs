use crate::controller::ControllerId;
use crate::error::Error;

use opentelemetry::trace::TraceId;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::exemplar::HistogramWithExemplars;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

#[derive(Clone, Default)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
}

impl Metrics {
    pub fn register(self, registry: &mut Registry) -> Self {
        Self {
            reconcile: self.reconcile.register(registry),
        }
    }

    pub fn count_and_measure(
        &self,
        controller: ControllerId,
        trace_id: &TraceId,
    ) -> ReconcileMeasurer {
        self.reconcile
            .runs
            .get_or_create(&ControllerLabel {
                controller: controller.to_string(),
            })
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: TraceLabel::from_id(trace_id),
            metric: self.reconcile.duration.clone(),
        }
    }

    pub fn set_failure(&self, controller: ControllerId, instance: &str, error: &Error) {
        self.reconcile
            .failures
            .get_or_create(&ErrorLabels {
                controller: controller.to_string(),
                instance: instance.to_string(),
                error: error.metric_label().to_string(),
            })
            .inc();
    }

    pub fn triggered_inc(&self, controller: ControllerId, action: Action, kind: &str) {
        self.reconcile
            .triggered
            .get_or_create(&TriggerLabels {
                controller: controller.to_string(),
                action,
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn ready_set(&self, controller: ControllerId, value: i64) {
        self.reconcile
            .ready
            .get_or_create(&ControllerLabel {
                controller: controller.to_string(),
            })
            .set(value);
    }

    pub fn watch_operations_failed_inc(&self, controller: ControllerId) {
        self.reconcile
            .watch_failures
            .get_or_create(&ControllerLabel {
                controller: controller.to_string(),
            })
            .inc();
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ControllerLabel {
    pub controller: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
pub struct ErrorLabels {
    pub controller: String,
    pub instance: String,
    pub error: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelValue, Debug)]
pub enum Action {
    Apply,
    Delete,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
pub struct TriggerLabels {
    pub controller: String,
    pub action: Action,
    pub kind: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}

impl TraceLabel {
    fn from_id(id: &TraceId) -> Option<Self> {
        if matches!(id, &TraceId::INVALID) {
            None
        } else {
            Some(Self { id: id.to_string() })
        }
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<ControllerLabel, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
    pub triggered: Family<TriggerLabels, Counter>,
    pub ready: Family<ControllerLabel, Gauge>,
    pub watch_failures: Family<ControllerLabel, Counter>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::default(),
            failures: Family::default(),
            duration: HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10.].into_iter()),
            triggered: Family::default(),
            ready: Family::default(),
            watch_failures: Family::default(),
        }
    }
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &mut Registry) -> Self {
        registry.register_with_unit(
            "flotilla_reconcile_duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        registry.register(
            "flotilla_reconcile_failures",
            "reconciliation errors",
            self.failures.clone(),
        );
        registry.register(
            "flotilla_reconcile_runs",
            "reconciliations",
            self.runs.clone(),
        );
        registry.register(
            "flotilla_reconcile_triggered",
            "reconciliations triggered by watched resources",
            self.triggered.clone(),
        );
        registry.register(
            "flotilla_controller_ready",
            "controller startup complete",
            self.ready.clone(),
        );
        registry.register(
            "flotilla_watch_operations_failed",
            "watch stream errors",
            self.watch_failures.clone(),
        );
        self
    }
}

/// Smart function duration measurer.
///
/// Relies on Drop to calculate duration and register the observation in the
/// histogram.
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}
