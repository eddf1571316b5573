use fleet_controller_core::FeatureId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Counter,
    conflicts: Counter,
    errors: Counter,
    applies: Family<ApplyLabels, Counter>,
    drift_reports: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ApplyLabels {
    feature: &'static str,
    result: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();

        prom.register(
            "reconcile",
            "Count of completed reconciliation passes",
            metrics.reconciles.clone(),
        );
        prom.register(
            "reconcile_conflicts",
            "Count of passes that lost an optimistic concurrency check",
            metrics.conflicts.clone(),
        );
        prom.register(
            "reconcile_errors",
            "Count of passes that failed to load or persist a pairing",
            metrics.errors.clone(),
        );
        prom.register(
            "feature_applies",
            "Count of feature deployments by result",
            metrics.applies.clone(),
        );
        prom.register(
            "drift_reports",
            "Count of drift reports received",
            metrics.drift_reports.clone(),
        );

        metrics
    }

    pub(crate) fn reconciled(&self) {
        self.reconciles.inc();
    }

    pub(crate) fn conflicted(&self) {
        self.conflicts.inc();
    }

    pub(crate) fn errored(&self) {
        self.errors.inc();
    }

    pub(crate) fn applied(&self, feature: FeatureId, result: &'static str) {
        self.applies
            .get_or_create(&ApplyLabels {
                feature: feature.as_str(),
                result,
            })
            .inc();
    }

    pub(crate) fn drift_reported(&self) {
        self.drift_reports.inc();
    }

    #[cfg(test)]
    pub(crate) fn reconcile_count(&self) -> u64 {
        self.reconciles.get()
    }

    #[cfg(test)]
    pub(crate) fn conflict_count(&self) -> u64 {
        self.conflicts.get()
    }

    #[cfg(test)]
    pub(crate) fn apply_count(&self, feature: FeatureId, result: &'static str) -> u64 {
        self.applies
            .get_or_create(&ApplyLabels {
                feature: feature.as_str(),
                result,
            })
            .get()
    }
}
