use crate::match_index::MatchIndex;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use fleet_controller_core::{Cluster, ClusterRef, OrderedSet, PairingKey, Policy, PolicyRef};
use fleet_controller_k8s_api::{Labels, Selector, SelectorError};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the latest policies and clusters and maps each change to the
/// pairings it affects.
#[derive(Debug)]
pub struct Index {
    policies: HashMap<PolicyRef, PolicyEntry>,
    clusters: HashMap<ClusterRef, Arc<Cluster>>,

    /// Policies and clusters whose deletion was observed. Their pairings are
    /// retired, whereas a policy or cluster that was never seen (e.g. before
    /// its watch has synced) is simply unknown.
    deleted_policies: HashSet<PolicyRef>,
    deleted_clusters: HashSet<ClusterRef>,

    matches: Arc<MatchIndex>,
    work: UnboundedSender<PairingKey>,
}

#[derive(Debug)]
struct PolicyEntry {
    policy: Arc<Policy>,

    /// Parsed once per policy update. An invalid selector matches nothing.
    selector: Result<Selector, SelectorError>,
}

/// A Cluster API machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Machine {
    pub namespace: String,
    pub name: String,
    pub labels: Labels,
}

/// An observed change to one resource.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Cluster(Cluster),
    ClusterDeleted(ClusterRef),
    Policy(Policy),
    PolicyDeleted(PolicyRef),
    Machine(Machine),
}

// === impl Index ===

impl Index {
    pub fn shared(matches: Arc<MatchIndex>, work: UnboundedSender<PairingKey>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            policies: HashMap::new(),
            clusters: HashMap::new(),
            deleted_policies: HashSet::new(),
            deleted_clusters: HashSet::new(),
            matches,
            work,
        }))
    }

    /// Records `change` and returns the pairings that must be reconciled.
    ///
    /// Updates return pairings that match now as well as pairings that
    /// matched before the change, so that dropped pairings get a chance to
    /// clean up. Deletions return the pairings that matched before.
    pub fn map(&mut self, change: Change) -> Vec<PairingKey> {
        match change {
            Change::Cluster(cluster) => self.apply_cluster(cluster),
            Change::ClusterDeleted(id) => self.delete_cluster(id),
            Change::Policy(policy) => self.apply_policy(policy),
            Change::PolicyDeleted(id) => self.delete_policy(id),
            Change::Machine(machine) => self.apply_machine(machine),
        }
    }

    /// Maps `change` and sends the affected pairings to the controller.
    pub(crate) fn map_and_enqueue(&mut self, change: Change) {
        for key in self.map(change) {
            tracing::trace!(%key, "Enqueueing");
            if self.work.send(key).is_err() {
                tracing::debug!("Work queue closed");
                return;
            }
        }
    }

    pub fn policy(&self, id: &PolicyRef) -> Option<Arc<Policy>> {
        self.policies.get(id).map(|e| e.policy.clone())
    }

    pub fn cluster(&self, id: &ClusterRef) -> Option<Arc<Cluster>> {
        self.clusters.get(id).cloned()
    }

    /// Whether the pairing's policy or cluster was deleted and has not
    /// reappeared since.
    pub fn is_retired(&self, key: &PairingKey) -> bool {
        self.deleted_policies.contains(&key.policy)
            || self.deleted_clusters.contains(&key.cluster)
    }

    /// Returns the parse error of the policy's selector, if it is invalid.
    pub fn selector_error(&self, id: &PolicyRef) -> Option<&SelectorError> {
        self.policies.get(id).and_then(|e| e.selector.as_ref().err())
    }

    pub fn matches(&self) -> &Arc<MatchIndex> {
        &self.matches
    }

    fn apply_cluster(&mut self, cluster: Cluster) -> Vec<PairingKey> {
        let id = cluster.id.clone();
        // Policies with an invalid selector match nothing here.
        let policies = self
            .policies
            .iter()
            .filter(|(_, entry)| entry.selects(&cluster.labels))
            .map(|(id, _)| id.clone())
            .collect::<OrderedSet<_>>();
        tracing::debug!(cluster = %id, policies = policies.len(), "Cluster updated");
        self.deleted_clusters.remove(&id);
        self.clusters.insert(id.clone(), Arc::new(cluster));

        let mut affected = policies.clone();
        affected.extend(self.matches.upsert_cluster(&id, policies));
        affected
            .into_iter()
            .map(|policy| PairingKey::new(policy, id.clone()))
            .collect()
    }

    fn delete_cluster(&mut self, id: ClusterRef) -> Vec<PairingKey> {
        tracing::debug!(cluster = %id, "Cluster deleted");
        self.clusters.remove(&id);
        self.deleted_clusters.insert(id.clone());
        self.matches
            .remove_cluster(&id)
            .into_iter()
            .map(|policy| PairingKey::new(policy, id.clone()))
            .collect()
    }

    fn apply_policy(&mut self, policy: Policy) -> Vec<PairingKey> {
        let id = policy.id.clone();
        self.deleted_policies.remove(&id);
        let entry = PolicyEntry {
            selector: policy.selector.parse(),
            policy: Arc::new(policy),
        };

        let clusters = match &entry.selector {
            Ok(_) => self
                .clusters
                .values()
                .filter(|cluster| entry.selects(&cluster.labels))
                .map(|cluster| cluster.id.clone())
                .collect::<OrderedSet<_>>(),
            Err(error) => {
                tracing::warn!(policy = %id, %error, "Invalid cluster selector; policy selects no clusters");
                self.policies.insert(id, entry);
                return Vec::new();
            }
        };
        tracing::debug!(policy = %id, clusters = clusters.len(), "Policy updated");
        self.policies.insert(id.clone(), entry);

        let mut affected = clusters.clone();
        affected.extend(self.matches.upsert_policy(&id, clusters));
        affected
            .into_iter()
            .map(|cluster| PairingKey::new(id.clone(), cluster))
            .collect()
    }

    fn delete_policy(&mut self, id: PolicyRef) -> Vec<PairingKey> {
        tracing::debug!(policy = %id, "Policy deleted");
        self.policies.remove(&id);
        self.deleted_policies.insert(id.clone());
        self.matches
            .remove_policy(&id)
            .into_iter()
            .map(|cluster| PairingKey::new(id.clone(), cluster))
            .collect()
    }

    /// Machines affect the readiness of the cluster that owns them, so a
    /// machine change requeues every pairing of that cluster.
    fn apply_machine(&mut self, machine: Machine) -> Vec<PairingKey> {
        let cluster = match machine
            .labels
            .as_ref()
            .get(fleet_controller_k8s_api::machine::CLUSTER_NAME_LABEL)
        {
            Some(name) => ClusterRef::capi(&machine.namespace, name),
            None => {
                tracing::debug!(
                    namespace = %machine.namespace,
                    machine = %machine.name,
                    "Machine has no cluster label"
                );
                return Vec::new();
            }
        };

        self.matches
            .policies_for(&cluster)
            .into_iter()
            .map(|policy| PairingKey::new(policy, cluster.clone()))
            .collect()
    }
}

// === impl PolicyEntry ===

impl PolicyEntry {
    fn selects(&self, labels: &Labels) -> bool {
        match &self.selector {
            Ok(selector) => selector.matches(labels),
            Err(_) => false,
        }
    }
}
