
use crate::{CompanionConfig, ControllerMetrics, DriftChannel, Reconciler, ReconcilerConfig};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use fleet_controller_core::{
    ApplyError, ApplyMode, Catalog, Cluster, ClusterRef, CompanionRequest, CompanionSink, Feature,
    FeatureApplier, FeatureId, GroupVersionKind, PairingKey, PairingStatus, PairingStore, Policy,
    PolicyRef, StoreError, Stored, SyncMode,
};
use fleet_controller_k8s_api::Labels;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub(crate) fn mk_key(policy: &str, cluster: &str) -> PairingKey {
    PairingKey::new(
        PolicyRef::fleet_policy(policy),
        ClusterRef::capi("fleet", cluster),
    )
}

pub(crate) fn mk_feature(id: FeatureId, manifests: &[&str]) -> Feature {
    Feature {
        id,
        manifests: manifests.iter().map(|m| m.to_string()).collect(),
    }
}

pub(crate) fn mk_policy(key: &PairingKey, sync_mode: SyncMode, features: Vec<Feature>) -> Policy {
    Policy {
        id: key.policy.clone(),
        selector: "env=production".to_string(),
        sync_mode,
        features,
    }
}

pub(crate) fn mk_cluster(key: &PairingKey, ready: bool) -> Cluster {
    Cluster {
        id: key.cluster.clone(),
        labels: Labels::from_iter([("env", "production")]),
        ready,
        credentials: format!("{}-kubeconfig", key.cluster.name),
    }
}

// === MemoryStore ===

/// A pairing store with versioned records.
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<HashMap<PairingKey, Stored>>,
    versions: AtomicUsize,
    writes: AtomicUsize,
    conflicts: AtomicUsize,
    deleted: Mutex<Vec<PairingKey>>,
}

impl MemoryStore {
    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub(crate) fn insert(&self, key: &PairingKey, status: PairingStatus) {
        let version = self.next_version();
        self.records
            .lock()
            .insert(key.clone(), Stored { status, version });
    }

    pub(crate) fn status(&self, key: &PairingKey) -> Option<PairingStatus> {
        self.records.lock().get(key).map(|s| s.status.clone())
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fails the next `n` writes with a conflict.
    pub(crate) fn conflict_next_writes(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn deleted(&self) -> Vec<PairingKey> {
        self.deleted.lock().clone()
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl PairingStore for MemoryStore {
    async fn get(&self, key: &PairingKey) -> Result<Option<Stored>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn create(&self, key: &PairingKey, status: &PairingStatus) -> Result<String, StoreError> {
        if self.take_conflict() || self.records.lock().contains_key(key) {
            return Err(StoreError::Conflict);
        }
        let version = self.next_version();
        self.records.lock().insert(
            key.clone(),
            Stored {
                status: status.clone(),
                version: version.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }

    async fn update(
        &self,
        key: &PairingKey,
        status: &PairingStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        if self.take_conflict() {
            return Err(StoreError::Conflict);
        }
        let next = self.next_version();
        let mut records = self.records.lock();
        match records.get_mut(key) {
            Some(stored) if stored.version == version => {
                *stored = Stored {
                    status: status.clone(),
                    version: next.clone(),
                };
            }
            Some(_) => return Err(StoreError::Conflict),
            None => return Err(StoreError::NotFound),
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }

    async fn delete(&self, key: &PairingKey) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        self.deleted.lock().push(key.clone());
        Ok(())
    }
}

// === FakeApplier ===

/// Records deployments and fails them on request.
pub(crate) struct FakeApplier {
    calls: Mutex<Vec<(FeatureId, ApplyMode)>>,
    failures: Mutex<HashMap<FeatureId, (ApplyError, usize)>>,
    deployed: Vec<GroupVersionKind>,
    hang: AtomicBool,
}

impl Default for FakeApplier {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            failures: Mutex::default(),
            deployed: vec![GroupVersionKind::new("apps", "v1", "Deployment")],
            hang: AtomicBool::new(false),
        }
    }
}

impl FakeApplier {
    pub(crate) fn calls(&self) -> Vec<(FeatureId, ApplyMode)> {
        self.calls.lock().clone()
    }

    /// Fails the next `times` deployments of `feature`.
    pub(crate) fn fail(&self, feature: FeatureId, times: usize) {
        self.failures.lock().insert(
            feature,
            (ApplyError::new("ApplyFailed", "admission webhook denied"), times),
        );
    }

    /// Fails the next `times` deployments of `feature` after its first
    /// object was deployed.
    pub(crate) fn fail_partway(&self, feature: FeatureId, times: usize) {
        let error = ApplyError::new("ApplyFailed", "service quota exceeded")
            .with_deployed(self.deployed.clone());
        self.failures.lock().insert(feature, (error, times));
    }

    pub(crate) fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl FeatureApplier for FakeApplier {
    async fn apply(
        &self,
        _cluster: &Cluster,
        feature: &Feature,
        mode: ApplyMode,
    ) -> Result<Vec<GroupVersionKind>, ApplyError> {
        self.calls.lock().push((feature.id, mode));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some((error, remaining)) = self.failures.lock().get_mut(&feature.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(self.deployed.clone())
    }
}

// === FakeCompanions ===

#[derive(Default)]
pub(crate) struct FakeCompanions(Mutex<Vec<CompanionRequest>>);

impl FakeCompanions {
    pub(crate) fn requests(&self) -> Vec<CompanionRequest> {
        self.0.lock().clone()
    }
}

#[async_trait::async_trait]
impl CompanionSink for FakeCompanions {
    async fn ensure(&self, _cluster: &Cluster, request: CompanionRequest) -> anyhow::Result<()> {
        self.0.lock().push(request);
        Ok(())
    }
}

// === FakeCatalog ===

#[derive(Default)]
pub(crate) struct FakeCatalog {
    policies: Mutex<HashMap<PolicyRef, Arc<Policy>>>,
    clusters: Mutex<HashMap<ClusterRef, Arc<Cluster>>>,
    matched: Mutex<HashSet<PairingKey>>,
    deleted_clusters: Mutex<HashSet<ClusterRef>>,
}

impl FakeCatalog {
    pub(crate) fn set_policy(&self, policy: Policy) {
        self.policies
            .lock()
            .insert(policy.id.clone(), Arc::new(policy));
    }

    pub(crate) fn set_cluster(&self, cluster: Cluster) {
        self.deleted_clusters.lock().remove(&cluster.id);
        self.clusters
            .lock()
            .insert(cluster.id.clone(), Arc::new(cluster));
    }

    /// Deletes the cluster, retiring its pairings.
    pub(crate) fn remove_cluster(&self, id: &ClusterRef) {
        self.clusters.lock().remove(id);
        self.deleted_clusters.lock().insert(id.clone());
    }

    pub(crate) fn set_matched(&self, key: &PairingKey, matched: bool) {
        if matched {
            self.matched.lock().insert(key.clone());
        } else {
            self.matched.lock().remove(key);
        }
    }
}

impl Catalog for FakeCatalog {
    fn policy(&self, id: &PolicyRef) -> Option<Arc<Policy>> {
        self.policies.lock().get(id).cloned()
    }

    fn cluster(&self, id: &ClusterRef) -> Option<Arc<Cluster>> {
        self.clusters.lock().get(id).cloned()
    }

    fn is_matched(&self, key: &PairingKey) -> bool {
        self.matched.lock().contains(key)
    }

    fn is_retired(&self, key: &PairingKey) -> bool {
        self.deleted_clusters.lock().contains(&key.cluster)
    }
}

// === Harness ===

pub(crate) struct Harness {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) applier: Arc<FakeApplier>,
    pub(crate) companions: Arc<FakeCompanions>,
    pub(crate) catalog: Arc<FakeCatalog>,
    pub(crate) drift: DriftChannel,
    pub(crate) metrics: ControllerMetrics,
    pub(crate) work_rx: UnboundedReceiver<PairingKey>,
    pub(crate) config: ReconcilerConfig,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let _tracing = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let metrics = ControllerMetrics::default();
        Self {
            store: Arc::default(),
            applier: Arc::default(),
            companions: Arc::default(),
            catalog: Arc::default(),
            drift: DriftChannel::new(work_tx, metrics.clone()),
            metrics,
            work_rx,
            config: ReconcilerConfig {
                apply_timeout: Duration::from_secs(5),
                persist_timeout: Duration::from_secs(5),
                companion: CompanionConfig::default(),
            },
        }
    }

    pub(crate) fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.applier.clone(),
            self.companions.clone(),
            self.catalog.clone(),
            self.drift.clone(),
            self.config.clone(),
            self.metrics.clone(),
        )
    }

    /// Registers a matched pairing of `policy` and a ready cluster.
    pub(crate) fn pair(&self, key: &PairingKey, sync_mode: SyncMode, features: Vec<Feature>) {
        self.catalog.set_policy(mk_policy(key, sync_mode, features));
        self.catalog.set_cluster(mk_cluster(key, true));
        self.catalog.set_matched(key, true);
    }
}
