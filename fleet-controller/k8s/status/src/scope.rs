use crate::reconcile::{within, ReconcileError};
use fleet_controller_core::{
    sync, FeatureId, FeatureStatus, FeatureSummary, GroupVersionKind, OrderedSet, PairingKey,
    PairingStatus, PairingStore,
};
use fleet_controller_k8s_api::Time;
use std::time::Duration;

/// A pairing status loaded for one reconciliation pass.
///
/// Mutators edit an in-memory copy; nothing is written until [`close`]
/// persists the whole status at once. A scope dropped after being modified
/// without being closed loses its changes and logs a warning.
///
/// [`close`]: PairingScope::close
pub struct PairingScope<'s> {
    store: &'s dyn PairingStore,
    key: PairingKey,
    timeout: Duration,

    /// The status and version as loaded, if the record exists.
    loaded: Option<(PairingStatus, String)>,
    status: PairingStatus,
    transitions: Vec<Transition>,
    closed: bool,
}

/// A change of one feature's status within a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub feature: FeatureId,
    pub from: Option<FeatureStatus>,
    pub to: FeatureStatus,
}

// === impl PairingScope ===

impl<'s> PairingScope<'s> {
    /// Loads the pairing's status, starting from an empty status if none is
    /// stored yet.
    pub async fn open(
        store: &'s dyn PairingStore,
        key: PairingKey,
        timeout: Duration,
    ) -> Result<PairingScope<'s>, ReconcileError> {
        let loaded = within("load", timeout, store.get(&key))
            .await?
            .map(|stored| (stored.status, stored.version));
        let status = loaded
            .as_ref()
            .map(|(status, _)| status.clone())
            .unwrap_or_default();

        Ok(Self {
            store,
            key,
            timeout,
            loaded,
            status,
            transitions: Vec::new(),
            closed: false,
        })
    }

    pub fn key(&self) -> &PairingKey {
        &self.key
    }

    /// Whether a record was stored before this pass.
    pub fn exists(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn status(&self) -> &PairingStatus {
        &self.status
    }

    pub fn feature(&self, id: FeatureId) -> Option<&FeatureSummary> {
        self.status.feature(id)
    }

    pub fn feature_ids(&self) -> Vec<FeatureId> {
        self.status
            .feature_summaries
            .iter()
            .map(|f| f.feature_id)
            .collect()
    }

    /// Status transitions recorded so far, in order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn is_modified(&self) -> bool {
        match &self.loaded {
            Some((status, _)) => *status != self.status,
            None => self.status != PairingStatus::default(),
        }
    }

    /// Returns the summary for `id`, appending a new one if the feature is
    /// not yet recorded.
    fn summary_mut(&mut self, id: FeatureId) -> &mut FeatureSummary {
        let summaries = &mut self.status.feature_summaries;
        let idx = match summaries.iter().position(|f| f.feature_id == id) {
            Some(idx) => idx,
            None => {
                summaries.push(FeatureSummary::new(id));
                summaries.len() - 1
            }
        };
        &mut summaries[idx]
    }

    pub fn set_matching(&mut self, matching: bool) {
        self.status.matching = matching;
    }

    /// Sets the feature's status and hash.
    pub fn set_feature_status(&mut self, id: FeatureId, status: FeatureStatus, hash: Option<Vec<u8>>) {
        let summary = self.summary_mut(id);
        let from = summary.status;
        summary.status = Some(status);
        summary.hash = hash;

        if from == Some(status) {
            return;
        }
        if !sync::is_valid_transition(from, status) {
            debug_assert!(false, "invalid transition {from:?} -> {status} for {id}");
            tracing::warn!(feature = %id, ?from, to = %status, "Invalid feature status transition");
        }
        tracing::debug!(feature = %id, ?from, to = %status, "Feature status changed");
        self.transitions.push(Transition {
            feature: id,
            from,
            to: status,
        });
    }

    pub fn set_failure_reason(&mut self, id: FeatureId, reason: Option<String>) {
        self.summary_mut(id).failure_reason = reason;
    }

    pub fn set_failure_message(&mut self, id: FeatureId, message: Option<String>) {
        self.summary_mut(id).failure_message = message;
    }

    /// Merges `deployed` into the feature's deployed kinds. Existing entries
    /// keep their position and duplicates are dropped.
    pub fn set_deployed_group_version_kind(&mut self, id: FeatureId, deployed: &[GroupVersionKind]) {
        let summary = self.summary_mut(id);
        let mut kinds = summary
            .deployed_group_version_kind
            .drain(..)
            .collect::<OrderedSet<_>>();
        kinds.extend(deployed.iter().map(GroupVersionKind::key));
        summary.deployed_group_version_kind = kinds.into_vec();
    }

    pub fn set_last_applied_time(&mut self, id: FeatureId, time: Option<Time>) {
        self.summary_mut(id).last_applied_time = time;
    }

    pub fn set_dry_run(&mut self, id: FeatureId, dry_run: bool) {
        self.summary_mut(id).dry_run = dry_run;
    }

    /// Persists the status, creating the record if it did not exist.
    ///
    /// Nothing is written when an existing record is unchanged. Fails with
    /// [`ReconcileError::Conflict`] if the record changed since it was
    /// loaded; the caller should restart the pass from [`open`].
    ///
    /// [`open`]: PairingScope::open
    pub async fn close(mut self) -> Result<PairingStatus, ReconcileError> {
        self.closed = true;
        let status = std::mem::take(&mut self.status);

        match &self.loaded {
            Some((loaded, _)) if *loaded == status => {
                tracing::trace!(pairing = %self.key, "Status unchanged");
            }
            Some((_, version)) => {
                within("update", self.timeout, self.store.update(&self.key, &status, version))
                    .await?;
                tracing::debug!(pairing = %self.key, "Updated status");
            }
            None => {
                within("create", self.timeout, self.store.create(&self.key, &status)).await?;
                tracing::debug!(pairing = %self.key, "Created status");
            }
        }
        Ok(status)
    }

    /// Drops the scope without persisting anything.
    pub fn discard(mut self) {
        self.closed = true;
    }
}

impl Drop for PairingScope<'_> {
    fn drop(&mut self) {
        if !self.closed && self.is_modified() {
            tracing::warn!(pairing = %self.key, "Pairing scope dropped without being closed; changes are lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{mk_key, MemoryStore};
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn mutators_keep_one_summary_per_feature() {
        let store = MemoryStore::default();
        let mut scope = PairingScope::open(&store, mk_key("p", "c"), TIMEOUT)
            .await
            .unwrap();

        scope.set_failure_reason(FeatureId::Helm, Some("ApplyFailed".to_string()));
        scope.set_failure_message(FeatureId::Helm, Some("boom".to_string()));
        scope.set_feature_status(FeatureId::Resources, FeatureStatus::Provisioning, None);
        scope.set_last_applied_time(FeatureId::Helm, None);
        scope.set_dry_run(FeatureId::Resources, true);

        let ids = scope.feature_ids();
        assert_eq!(ids, vec![FeatureId::Helm, FeatureId::Resources]);
        let helm = scope.feature(FeatureId::Helm).unwrap();
        assert_eq!(helm.failure_reason.as_deref(), Some("ApplyFailed"));
        assert_eq!(helm.failure_message.as_deref(), Some("boom"));
        assert_eq!(helm.status, None);
        scope.discard();
    }

    #[tokio::test]
    async fn deployed_kinds_merge_in_order() {
        let store = MemoryStore::default();
        let mut scope = PairingScope::open(&store, mk_key("p", "c"), TIMEOUT)
            .await
            .unwrap();

        let deployment = GroupVersionKind::new("apps", "v1", "Deployment");
        let config_map = GroupVersionKind::new("", "v1", "ConfigMap");
        let service = GroupVersionKind::new("", "v1", "Service");

        scope.set_deployed_group_version_kind(
            FeatureId::Resources,
            &[deployment.clone(), config_map.clone()],
        );
        scope.set_deployed_group_version_kind(
            FeatureId::Resources,
            &[config_map.clone(), service, deployment],
        );
        let once = scope.status().clone();
        scope.set_deployed_group_version_kind(FeatureId::Resources, &[config_map]);

        assert_eq!(scope.status(), &once, "merging is idempotent");
        assert_eq!(
            scope
                .feature(FeatureId::Resources)
                .unwrap()
                .deployed_group_version_kind,
            vec!["Deployment.v1.apps", "ConfigMap.v1.", "Service.v1."]
        );
        scope.discard();
    }

    #[tokio::test]
    async fn close_creates_then_updates() {
        let store = MemoryStore::default();
        let key = mk_key("p", "c");

        let mut scope = PairingScope::open(&store, key.clone(), TIMEOUT).await.unwrap();
        assert!(!scope.exists());
        scope.set_feature_status(FeatureId::Resources, FeatureStatus::Provisioning, None);
        scope.close().await.unwrap();
        assert_eq!(store.writes(), 1);

        let mut scope = PairingScope::open(&store, key.clone(), TIMEOUT).await.unwrap();
        assert!(scope.exists());
        scope.set_feature_status(
            FeatureId::Resources,
            FeatureStatus::Provisioned,
            Some(vec![1, 2, 3]),
        );
        assert_eq!(
            scope.transitions(),
            &[Transition {
                feature: FeatureId::Resources,
                from: Some(FeatureStatus::Provisioning),
                to: FeatureStatus::Provisioned,
            }]
        );
        let status = scope.close().await.unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.status(&key), Some(status));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let store = MemoryStore::default();
        let key = mk_key("p", "c");
        store.insert(&key, PairingStatus::default());

        let mut scope = PairingScope::open(&store, key, TIMEOUT).await.unwrap();
        scope.set_matching(true);
        scope.close().await.unwrap();
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn concurrent_writes_conflict() {
        let store = MemoryStore::default();
        let key = mk_key("p", "c");
        store.insert(&key, PairingStatus::default());

        let mut first = PairingScope::open(&store, key.clone(), TIMEOUT).await.unwrap();
        let mut second = PairingScope::open(&store, key.clone(), TIMEOUT).await.unwrap();

        first.set_matching(false);
        first.close().await.unwrap();

        second.set_feature_status(FeatureId::Helm, FeatureStatus::Provisioning, None);
        let error = second.close().await.unwrap_err();
        assert!(matches!(error, ReconcileError::Conflict), "{error}");
        assert!(!store.status(&key).unwrap().matching);
    }
}
