use crate::{
    metrics::ControllerMetrics,
    reconcile::{Pass, ReconcileError, Reconciler},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use fleet_controller_core::PairingKey;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc::UnboundedReceiver, Semaphore},
    task::{self, JoinSet},
    time,
};
use tracing::{info_span, Instrument};

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Maximum number of concurrent passes.
    pub workers: usize,

    /// Delay before retrying a pass that lost a concurrency check.
    pub conflict_backoff: Duration,

    /// Delay before retrying a pass that failed to load or persist.
    pub error_backoff: Duration,

    /// Delay before revisiting a pairing with failed features.
    pub failure_requeue: Duration,
}

/// Drives reconciliation passes from a queue of pairing keys.
///
/// At most one pass runs per key; keys that arrive while their pass is
/// running are coalesced into a single follow-up pass.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    work: UnboundedReceiver<PairingKey>,
    config: ControllerConfig,
    metrics: ControllerMetrics,
}

#[derive(Default)]
struct Queue {
    in_flight: HashSet<PairingKey>,
    pending: HashSet<PairingKey>,
    passes: JoinSet<(PairingKey, Result<Pass, ReconcileError>)>,
    tasks: HashMap<task::Id, PairingKey>,
    timers: JoinSet<PairingKey>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            conflict_backoff: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            failure_requeue: Duration::from_secs(60),
        }
    }
}

// === impl Controller ===

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        work: UnboundedReceiver<PairingKey>,
        config: ControllerConfig,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            work,
            config,
            metrics,
        }
    }

    /// Processes work until the queue is closed and every pass, including
    /// scheduled retries, has completed. Dropping the returned future aborts
    /// all running passes.
    pub async fn run(mut self) {
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut queue = Queue::default();
        let mut open = true;

        loop {
            if !open && queue.passes.is_empty() && queue.timers.is_empty() {
                return;
            }

            tokio::select! {
                key = self.work.recv(), if open => match key {
                    Some(key) => queue.schedule(key, &self.reconciler, &workers),
                    None => {
                        tracing::debug!("Work queue closed");
                        open = false;
                    }
                },

                Some(res) = queue.passes.join_next() => match res {
                    Ok((key, result)) => {
                        queue.tasks.retain(|_, k| *k != key);
                        let retry = self.complete(&key, result);
                        queue.finish(key, retry, &self.reconciler, &workers);
                    }
                    Err(error) => {
                        tracing::error!(%error, "Reconciliation task failed");
                        if let Some(key) = queue.tasks.remove(&error.id()) {
                            queue.finish(key, Some(self.config.error_backoff), &self.reconciler, &workers);
                        }
                    }
                },

                Some(res) = queue.timers.join_next() => {
                    if let Ok(key) = res {
                        queue.schedule(key, &self.reconciler, &workers);
                    }
                },

                else => return,
            }
        }
    }

    /// Records the outcome of a pass, returning the delay after which the
    /// pairing should be revisited.
    fn complete(&self, key: &PairingKey, result: Result<Pass, ReconcileError>) -> Option<Duration> {
        match result {
            Ok(pass) => {
                self.metrics.reconciled();
                if pass.has_failures() {
                    tracing::debug!(pairing = %key, features = ?pass.failed_features(), "Requeueing failed features");
                    return Some(self.config.failure_requeue);
                }
                None
            }
            Err(ReconcileError::Conflict) => {
                self.metrics.conflicted();
                tracing::debug!(pairing = %key, "Pairing changed during reconciliation; retrying");
                Some(self.config.conflict_backoff)
            }
            Err(error) => {
                self.metrics.errored();
                tracing::warn!(pairing = %key, %error, "Reconciliation failed");
                Some(self.config.error_backoff)
            }
        }
    }
}

// === impl Queue ===

impl Queue {
    fn schedule(&mut self, key: PairingKey, reconciler: &Arc<Reconciler>, workers: &Arc<Semaphore>) {
        if self.in_flight.contains(&key) {
            tracing::trace!(pairing = %key, "Coalescing");
            self.pending.insert(key);
            return;
        }
        self.in_flight.insert(key.clone());

        let reconciler = reconciler.clone();
        let workers = workers.clone();
        let span = info_span!("reconcile", policy = %key.policy, cluster = %key.cluster);
        let task_key = key.clone();
        let handle = self.passes.spawn(
            async move {
                // The semaphore is never closed.
                let _permit = workers.acquire_owned().await.ok();
                let result = reconciler.reconcile(&key).await;
                (key, result)
            }
            .instrument(span),
        );
        self.tasks.insert(handle.id(), task_key);
    }

    fn finish(
        &mut self,
        key: PairingKey,
        retry: Option<Duration>,
        reconciler: &Arc<Reconciler>,
        workers: &Arc<Semaphore>,
    ) {
        self.in_flight.remove(&key);
        if self.pending.remove(&key) {
            self.schedule(key, reconciler, workers);
            return;
        }
        if let Some(delay) = retry {
            self.timers.spawn(async move {
                time::sleep(delay).await;
                key
            });
        }
    }
}
