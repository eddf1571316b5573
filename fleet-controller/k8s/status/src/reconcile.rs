use crate::{
    companion::CompanionConfig,
    drift::DriftChannel,
    metrics::ControllerMetrics,
    scope::{PairingScope, Transition},
};
use fleet_controller_core::{
    sync::{self, Decision, Reason},
    ApplyError, ApplyMode, Catalog, Cluster, CompanionSink, DriftReport, Feature, FeatureApplier,
    FeatureId, FeatureStatus, PairingKey, PairingStatus, PairingStore, Policy, StoreError,
    SyncMode,
};
use fleet_controller_k8s_api::{chrono::Utc, Time};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Bounds each feature deployment.
    pub apply_timeout: Duration,

    /// Bounds each load or write of a pairing.
    pub persist_timeout: Duration,

    pub companion: CompanionConfig,
}

/// Runs reconciliation passes.
pub struct Reconciler {
    store: Arc<dyn PairingStore>,
    applier: Arc<dyn FeatureApplier>,
    companions: Arc<dyn CompanionSink>,
    catalog: Arc<dyn Catalog>,
    drift: DriftChannel,
    config: ReconcilerConfig,
    metrics: ControllerMetrics,
}

/// The outcome of one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    /// The status as persisted by the pass.
    pub status: PairingStatus,

    pub transitions: Vec<Transition>,

    /// Set when the pairing record was deleted.
    pub retired: bool,

    /// Set when the policy or the cluster has not been observed yet, so the
    /// pass left the pairing alone.
    pub skipped: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The pairing changed while the pass ran. The pass should be retried.
    #[error("pairing was modified concurrently")]
    Conflict,

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("failed to {operation} pairing: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Runs a store operation with a deadline.
pub(crate) async fn within<T>(
    operation: &'static str,
    after: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ReconcileError> {
    match time::timeout(after, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(StoreError::Conflict)) => Err(ReconcileError::Conflict),
        Ok(Err(source)) => Err(ReconcileError::Store { operation, source }),
        Err(_) => Err(ReconcileError::Timeout { operation, after }),
    }
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        store: Arc<dyn PairingStore>,
        applier: Arc<dyn FeatureApplier>,
        companions: Arc<dyn CompanionSink>,
        catalog: Arc<dyn Catalog>,
        drift: DriftChannel,
        config: ReconcilerConfig,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            store,
            applier,
            companions,
            catalog,
            drift,
            config,
            metrics,
        }
    }

    /// Runs one pass for `key`.
    ///
    /// When the policy or the cluster was deleted the pairing is retired.
    /// When either has not been observed yet the pass does nothing; the
    /// watch that delivers it enqueues the pairing again. When both exist
    /// but no longer match, the pairing is marked as not matching and its
    /// feature summaries are left as they are.
    pub async fn reconcile(&self, key: &PairingKey) -> Result<Pass, ReconcileError> {
        let (policy, cluster) = match (
            self.catalog.policy(&key.policy),
            self.catalog.cluster(&key.cluster),
        ) {
            (Some(policy), Some(cluster)) => (policy, cluster),
            _ if self.catalog.is_retired(key) => return self.retire(key).await,
            _ => {
                tracing::debug!("Policy or cluster not yet known; skipping");
                return Ok(Pass::skipped());
            }
        };

        let mut scope =
            PairingScope::open(&*self.store, key.clone(), self.config.persist_timeout).await?;

        if !self.catalog.is_matched(key) {
            if !scope.exists() {
                tracing::trace!("Pairing never matched");
                let status = scope.status().clone();
                scope.discard();
                return Ok(Pass {
                    status: PairingStatus {
                        matching: false,
                        ..status
                    },
                    transitions: Vec::new(),
                    retired: false,
                    skipped: false,
                });
            }
            tracing::debug!("Pairing no longer matches");
            scope.set_matching(false);
            let status = scope.close().await?;
            return Ok(Pass {
                status,
                transitions: Vec::new(),
                retired: false,
                skipped: false,
            });
        }

        scope.set_matching(true);
        let drift = self.sync_features(&mut scope, &policy, &cluster).await;

        let transitions = scope.transitions().to_vec();
        let status = scope.close().await?;

        // Only a persisted outcome settles the report; on any error above it
        // stays in place for the retried pass.
        if let Some(report) = drift {
            self.drift.acknowledge(key, &report);
        }

        Ok(Pass {
            status,
            transitions,
            retired: false,
            skipped: false,
        })
    }

    /// Marks every feature of the pairing as removed, persists that, and then
    /// deletes the record. Any drift report for the pairing is dropped.
    pub async fn retire(&self, key: &PairingKey) -> Result<Pass, ReconcileError> {
        self.drift.retire(key);

        let mut scope =
            PairingScope::open(&*self.store, key.clone(), self.config.persist_timeout).await?;
        if !scope.exists() {
            scope.discard();
            return Ok(Pass {
                status: PairingStatus::default(),
                transitions: Vec::new(),
                retired: true,
                skipped: false,
            });
        }

        tracing::debug!("Retiring pairing");
        for id in scope.feature_ids() {
            let hash = scope.feature(id).and_then(|f| f.hash.clone());
            scope.set_feature_status(id, FeatureStatus::Removed, hash);
        }
        scope.set_matching(false);
        let transitions = scope.transitions().to_vec();
        let status = scope.close().await?;

        within(
            "delete",
            self.config.persist_timeout,
            self.store.delete(key),
        )
        .await
        .or_else(|error| match error {
            ReconcileError::Store {
                source: StoreError::NotFound,
                ..
            } => Ok(()),
            error => Err(error),
        })?;

        Ok(Pass {
            status,
            transitions,
            retired: true,
            skipped: false,
        })
    }

    /// Applies the policy's features, returning the drift report the pass
    /// acted on.
    async fn sync_features(
        &self,
        scope: &mut PairingScope<'_>,
        policy: &Policy,
        cluster: &Cluster,
    ) -> Option<Arc<DriftReport>> {
        let mode = policy.sync_mode;
        if !cluster.ready {
            tracing::debug!(cluster = %cluster.id, "Cluster is not ready; deferring");
            return None;
        }

        let drift = match mode {
            SyncMode::ContinuousWithDriftDetection => {
                self.ensure_companion(cluster).await;
                self.drift.consume(scope.key())
            }
            _ => None,
        };

        for feature in &policy.features {
            let hash = feature.hash();
            let decision = sync::decide(
                mode,
                scope.feature(feature.id),
                &hash,
                drift.as_deref(),
                cluster.ready,
            );
            match decision {
                Decision::Defer => return drift,
                Decision::Keep => {
                    tracing::trace!(feature = %feature.id, "Feature is current");
                }
                Decision::Apply(reason) => {
                    self.apply_feature(scope, cluster, feature, hash, reason)
                        .await
                }
            }
        }

        // Features dropped from the policy are no longer managed.
        for id in scope.feature_ids() {
            if policy.features.iter().any(|f| f.id == id) {
                continue;
            }
            let summary = scope.feature(id);
            if summary.and_then(|f| f.status) != Some(FeatureStatus::Removed) {
                let hash = summary.and_then(|f| f.hash.clone());
                scope.set_feature_status(id, FeatureStatus::Removed, hash);
            }
        }
        drift
    }

    async fn apply_feature(
        &self,
        scope: &mut PairingScope<'_>,
        cluster: &Cluster,
        feature: &Feature,
        hash: Vec<u8>,
        reason: Reason,
    ) {
        let id = feature.id;
        let mode = match reason {
            Reason::DryRun => ApplyMode::DryRun,
            _ => ApplyMode::Apply,
        };
        tracing::debug!(feature = %id, %reason, ?mode, "Deploying feature");

        let stored_hash = scope.feature(id).and_then(|f| f.hash.clone());
        scope.set_feature_status(id, FeatureStatus::Provisioning, stored_hash.clone());

        let timeout = self.config.apply_timeout;
        let result = time::timeout(timeout, self.applier.apply(cluster, feature, mode))
            .await
            .unwrap_or_else(|_| Err(ApplyError::timeout(timeout)));

        let dry_run = mode == ApplyMode::DryRun;
        match result {
            Ok(deployed) => {
                self.metrics.applied(id, "success");
                scope.set_feature_status(id, FeatureStatus::Provisioned, Some(hash));
                scope.set_failure_reason(id, None);
                scope.set_failure_message(id, None);
                scope.set_dry_run(id, dry_run);
                if !dry_run {
                    scope.set_deployed_group_version_kind(id, &deployed);
                    scope.set_last_applied_time(id, Some(Time(Utc::now())));
                }
            }
            Err(ApplyError {
                reason,
                message,
                deployed,
            }) => {
                self.metrics.applied(id, "failure");
                tracing::info!(feature = %id, %reason, %message, "Failed to deploy feature");
                scope.set_feature_status(id, FeatureStatus::Failed, stored_hash);
                scope.set_failure_reason(id, Some(reason));
                scope.set_failure_message(id, Some(message));
                scope.set_dry_run(id, dry_run);
                if !dry_run && !deployed.is_empty() {
                    scope.set_deployed_group_version_kind(id, &deployed);
                }
            }
        }
    }

    async fn ensure_companion(&self, cluster: &Cluster) {
        let request = self.config.companion.request(&cluster.id);
        if let Err(error) = self.companions.ensure(cluster, request).await {
            tracing::warn!(cluster = %cluster.id, %error, "Failed to deploy drift detector");
        }
    }
}

// === impl Pass ===

impl Pass {
    fn skipped() -> Self {
        Self {
            status: PairingStatus::default(),
            transitions: Vec::new(),
            retired: false,
            skipped: true,
        }
    }

    /// Whether any feature is left in the `Failed` state.
    pub fn has_failures(&self) -> bool {
        self.status
            .feature_summaries
            .iter()
            .any(|f| f.status == Some(FeatureStatus::Failed))
    }

    pub fn failed_features(&self) -> Vec<FeatureId> {
        self.status
            .feature_summaries
            .iter()
            .filter(|f| f.status == Some(FeatureStatus::Failed))
            .map(|f| f.feature_id)
            .collect()
    }
}
