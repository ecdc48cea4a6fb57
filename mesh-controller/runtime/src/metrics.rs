use crate::queue::Outcome;
use mesh_controller_core::Type;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<ResultLabels, Counter>,
    reconcile_duration: Histogram,
    mapped_requests: Family<TypeLabels, Counter>,
    queue_depth: Gauge,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ResultLabels {
    result: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct TypeLabels {
    r#type: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciles by result",
            reconciles.clone(),
        );

        let reconcile_duration = Histogram::new(
            [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0].into_iter(),
        );
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of reconcile latency, including failed and timed out runs",
            Unit::Seconds,
            reconcile_duration.clone(),
        );

        let mapped_requests = Family::<TypeLabels, Counter>::default();
        reg.register(
            "mapped_requests",
            "Total number of reconcile requests produced by mapping watched resources",
            mapped_requests.clone(),
        );

        let queue_depth = Gauge::default();
        reg.register(
            "queue_depth",
            "The number of requests waiting for a worker",
            queue_depth.clone(),
        );

        Self {
            reconciles,
            reconcile_duration,
            mapped_requests,
            queue_depth,
        }
    }

    pub(crate) fn queue_depth(&self) -> Gauge {
        self.queue_depth.clone()
    }

    pub(crate) fn mapped(&self, ty: Type, requests: usize) {
        self.mapped_requests
            .get_or_create(&TypeLabels { r#type: ty.kind() })
            .inc_by(requests as u64);
    }

    pub(crate) fn reconciled(&self, outcome: Outcome, start: time::Instant) {
        self.reconcile_duration
            .observe(start.elapsed().as_secs_f64());
        self.reconciles
            .get_or_create(&ResultLabels {
                result: outcome.as_str(),
            })
            .inc();
    }
}
