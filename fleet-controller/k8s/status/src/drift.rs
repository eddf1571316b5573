use crate::metrics::ControllerMetrics;
use ahash::AHashMap as HashMap;
use arc_swap::ArcSwap;
use fleet_controller_core::{DriftReport, PairingKey};
use fleet_controller_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

type Reports = HashMap<PairingKey, Arc<DriftReport>>;

/// Carries drift reports from the detectors to reconciliation passes.
///
/// Readers load a snapshot without locking; each publish swaps in a new
/// map. A report replaces the previous report for its pairing as a whole.
#[derive(Clone, Debug)]
pub struct DriftChannel {
    reports: Arc<ArcSwap<Reports>>,
    work: UnboundedSender<PairingKey>,
    metrics: ControllerMetrics,
}

/// Feeds `DriftReport` watch events into a [`DriftChannel`].
#[derive(Debug)]
pub struct DriftIngest {
    channel: DriftChannel,

    /// Maps each report's namespace and name to its pairing, since deletions
    /// only carry the former.
    keys: HashMap<(String, String), PairingKey>,
}

// === impl DriftChannel ===

impl DriftChannel {
    pub fn new(work: UnboundedSender<PairingKey>, metrics: ControllerMetrics) -> Self {
        Self {
            reports: Arc::new(ArcSwap::from_pointee(Reports::new())),
            work,
            metrics,
        }
    }

    /// Records the latest report for `key` and schedules a pass for it.
    pub fn publish(&self, key: PairingKey, report: DriftReport) {
        let report = Arc::new(report);
        self.reports.rcu(|reports| {
            let mut reports = Reports::clone(reports);
            reports.insert(key.clone(), report.clone());
            reports
        });
        self.metrics.drift_reported();

        tracing::debug!(pairing = %key, "Drift report received");
        if self.work.send(key).is_err() {
            tracing::debug!("Work queue closed");
        }
    }

    /// Returns the latest report for `key`, if any.
    ///
    /// The report stays in place until the pass that acted on it calls
    /// [`DriftChannel::acknowledge`], so a pass that fails to persist its
    /// outcome sees the same report when it is retried.
    pub fn consume(&self, key: &PairingKey) -> Option<Arc<DriftReport>> {
        self.reports.load().get(key).cloned()
    }

    /// Clears `report` once a pass has persisted its outcome. A newer report
    /// published in the meantime is kept.
    pub fn acknowledge(&self, key: &PairingKey, report: &Arc<DriftReport>) {
        self.reports.rcu(|reports| match reports.get(key) {
            Some(current) if Arc::ptr_eq(current, report) => {
                let mut reports = Reports::clone(reports);
                reports.remove(key);
                Arc::new(reports)
            }
            _ => reports.clone(),
        });
    }

    /// Forgets the report for `key`.
    pub fn retire(&self, key: &PairingKey) {
        if !self.reports.load().contains_key(key) {
            return;
        }
        self.reports.rcu(|reports| {
            let mut reports = Reports::clone(reports);
            reports.remove(key);
            reports
        });
    }
}

// === impl DriftIngest ===

impl DriftIngest {
    pub fn shared(channel: DriftChannel) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            channel,
            keys: HashMap::new(),
        }))
    }
}

impl kubert::index::IndexNamespacedResource<k8s::DriftReport> for DriftIngest {
    fn apply(&mut self, resource: k8s::DriftReport) {
        let namespace = match resource.namespace() {
            Some(namespace) => namespace,
            None => {
                tracing::warn!(name = %resource.name_any(), "DriftReport has no namespace");
                return;
            }
        };
        let key = PairingKey::from_spec(namespace.clone(), &resource.spec.pairing);
        self.keys
            .insert((namespace, resource.name_unchecked()), key.clone());
        self.channel
            .publish(key, DriftReport::from_spec(&resource.spec));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(key) = self.keys.remove(&(namespace, name)) {
            self.channel.retire(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mk_key;
    use fleet_controller_core::GroupVersionKind;
    use kubert::index::IndexNamespacedResource;
    use tokio::sync::mpsc;

    #[test]
    fn reports_replace_wholesale() {
        let (work_tx, mut work_rx) = mpsc::unbounded_channel();
        let channel = DriftChannel::new(work_tx, ControllerMetrics::default());
        let key = mk_key("p", "c");
        assert!(channel.consume(&key).is_none());

        channel.publish(
            key.clone(),
            DriftReport {
                resources: vec![],
                watched_kinds: vec![GroupVersionKind::new("", "v1", "ConfigMap")],
            },
        );
        channel.publish(key.clone(), DriftReport::default());
        assert_eq!(work_rx.try_recv().ok(), Some(key.clone()));
        assert_eq!(work_rx.try_recv().ok(), Some(key.clone()));

        let report = channel.consume(&key).expect("report must be visible");
        assert_eq!(*report, DriftReport::default());
        assert!(
            channel.consume(&key).is_some(),
            "reports remain until acknowledged"
        );

        channel.acknowledge(&key, &report);
        assert!(channel.consume(&key).is_none());
    }

    #[test]
    fn acknowledging_keeps_newer_reports() {
        let (work_tx, _work_rx) = mpsc::unbounded_channel();
        let channel = DriftChannel::new(work_tx, ControllerMetrics::default());
        let key = mk_key("p", "c");

        channel.publish(key.clone(), DriftReport::default());
        let stale = channel.consume(&key).expect("report must be visible");
        channel.publish(
            key.clone(),
            DriftReport {
                resources: vec![],
                watched_kinds: vec![GroupVersionKind::new("", "v1", "Secret")],
            },
        );

        channel.acknowledge(&key, &stale);
        let current = channel.consume(&key).expect("newer report must be kept");
        assert!(!Arc::ptr_eq(&current, &stale));
        assert_eq!(
            current.watched_kinds,
            vec![GroupVersionKind::new("", "v1", "Secret")]
        );
    }

    /// Every report a publisher hands over is either still visible or was
    /// acknowledged by the consumer that read it.
    #[test]
    fn concurrent_publishes_are_never_lost() {
        const REPORTS: usize = 2_000;

        let (work_tx, _work_rx) = mpsc::unbounded_channel();
        let channel = DriftChannel::new(work_tx, ControllerMetrics::default());
        let key = mk_key("p", "c");
        let report = |i: usize| DriftReport {
            resources: vec![],
            watched_kinds: vec![GroupVersionKind::new("", "v1", format!("Kind{i}"))],
        };

        let acknowledged = std::thread::scope(|s| {
            let consumer = s.spawn(|| {
                let mut acknowledged = Vec::new();
                loop {
                    if let Some(report) = channel.consume(&key) {
                        channel.acknowledge(&key, &report);
                        let done = report.watched_kinds[0].kind == format!("Kind{}", REPORTS - 1);
                        acknowledged.push(report);
                        if done {
                            return acknowledged;
                        }
                    }
                    std::thread::yield_now();
                }
            });
            for i in 0..REPORTS {
                channel.publish(key.clone(), report(i));
            }
            consumer.join().expect("consumer must not panic")
        });

        assert!(channel.consume(&key).is_none());
        let last = acknowledged.last().expect("the final report is acknowledged");
        assert_eq!(**last, report(REPORTS - 1));
    }

    #[test]
    fn ingests_watch_events() {
        let (work_tx, mut work_rx) = mpsc::unbounded_channel();
        let channel = DriftChannel::new(work_tx, ControllerMetrics::default());
        let ingest = DriftIngest::shared(channel.clone());
        let key = mk_key("p", "c");

        let mut report = k8s::DriftReport::new(
            &key.pairing_name(),
            k8s::DriftReportSpec {
                pairing: key.to_spec(),
                resources: vec![],
                watched_kinds: vec![],
            },
        );
        report.metadata.namespace = Some(key.cluster.namespace.clone());
        ingest.write().apply(report.clone());
        assert_eq!(work_rx.try_recv().ok(), Some(key.clone()));
        assert!(channel.consume(&key).is_some());

        ingest.write().apply(report);
        ingest
            .write()
            .delete(key.cluster.namespace.clone(), key.pairing_name());
        assert!(channel.consume(&key).is_none());
    }
}
