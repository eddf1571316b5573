use ahash::AHashMap as HashMap;
use fleet_controller_core::{ClusterRef, OrderedSet, PairingKey, PolicyRef};
use parking_lot::RwLock;
use std::{hash::Hash, sync::Arc};

/// The bidirectional relation between clusters and the policies that select
/// them.
///
/// Every update holds the write lock for its whole duration, so readers never
/// observe one direction updated without the other.
#[derive(Debug, Default)]
pub struct MatchIndex(RwLock<Inner>);

#[derive(Debug, Default)]
struct Inner {
    policies_by_cluster: HashMap<ClusterRef, OrderedSet<PolicyRef>>,
    clusters_by_policy: HashMap<PolicyRef, OrderedSet<ClusterRef>>,
}

/// A pair recorded in only one direction of the index.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{policy} and {cluster} are indexed in only one direction")]
pub struct InvariantViolation {
    pub policy: PolicyRef,
    pub cluster: ClusterRef,
}

// === impl MatchIndex ===

impl MatchIndex {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the set of policies matching `cluster`, returning the
    /// previous set.
    pub fn upsert_cluster(
        &self,
        cluster: &ClusterRef,
        policies: OrderedSet<PolicyRef>,
    ) -> OrderedSet<PolicyRef> {
        let mut inner = self.0.write();
        let Inner {
            policies_by_cluster,
            clusters_by_policy,
        } = &mut *inner;
        replace(policies_by_cluster, clusters_by_policy, cluster, policies)
    }

    /// Replaces the set of clusters matched by `policy`, returning the
    /// previous set.
    pub fn upsert_policy(
        &self,
        policy: &PolicyRef,
        clusters: OrderedSet<ClusterRef>,
    ) -> OrderedSet<ClusterRef> {
        let mut inner = self.0.write();
        let Inner {
            policies_by_cluster,
            clusters_by_policy,
        } = &mut *inner;
        replace(clusters_by_policy, policies_by_cluster, policy, clusters)
    }

    /// Forgets `cluster`, returning the policies that matched it.
    pub fn remove_cluster(&self, cluster: &ClusterRef) -> OrderedSet<PolicyRef> {
        self.upsert_cluster(cluster, OrderedSet::new())
    }

    /// Forgets `policy`, returning the clusters it matched.
    pub fn remove_policy(&self, policy: &PolicyRef) -> OrderedSet<ClusterRef> {
        self.upsert_policy(policy, OrderedSet::new())
    }

    pub fn policies_for(&self, cluster: &ClusterRef) -> OrderedSet<PolicyRef> {
        self.0
            .read()
            .policies_by_cluster
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clusters_for(&self, policy: &PolicyRef) -> OrderedSet<ClusterRef> {
        self.0
            .read()
            .clusters_by_policy
            .get(policy)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &PairingKey) -> bool {
        self.0
            .read()
            .policies_by_cluster
            .get(&key.cluster)
            .map(|policies| policies.contains(&key.policy))
            .unwrap_or(false)
    }

    /// Lists every matched pairing.
    pub fn pairings(&self) -> Vec<PairingKey> {
        let inner = self.0.read();
        inner
            .policies_by_cluster
            .iter()
            .flat_map(|(cluster, policies)| {
                policies
                    .iter()
                    .map(|policy| PairingKey::new(policy.clone(), cluster.clone()))
            })
            .collect()
    }

    /// Checks that both directions of the index agree.
    pub fn check_invariant(&self) -> Result<(), InvariantViolation> {
        let inner = self.0.read();
        for (cluster, policies) in &inner.policies_by_cluster {
            for policy in policies {
                let mirrored = inner
                    .clusters_by_policy
                    .get(policy)
                    .map(|clusters| clusters.contains(cluster))
                    .unwrap_or(false);
                if !mirrored {
                    return Err(InvariantViolation {
                        policy: policy.clone(),
                        cluster: cluster.clone(),
                    });
                }
            }
        }
        for (policy, clusters) in &inner.clusters_by_policy {
            for cluster in clusters {
                let mirrored = inner
                    .policies_by_cluster
                    .get(cluster)
                    .map(|policies| policies.contains(policy))
                    .unwrap_or(false);
                if !mirrored {
                    return Err(InvariantViolation {
                        policy: policy.clone(),
                        cluster: cluster.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the number of indexed clusters, policies, and pairings.
    pub(crate) fn sizes(&self) -> (usize, usize, usize) {
        let inner = self.0.read();
        let pairings = inner.policies_by_cluster.values().map(OrderedSet::len).sum();
        (
            inner.policies_by_cluster.len(),
            inner.clusters_by_policy.len(),
            pairings,
        )
    }
}

/// Replaces the values of `key` in `forward`, mirroring every addition and
/// removal into `reverse`. Empty sets are not stored.
fn replace<K, V>(
    forward: &mut HashMap<K, OrderedSet<V>>,
    reverse: &mut HashMap<V, OrderedSet<K>>,
    key: &K,
    values: OrderedSet<V>,
) -> OrderedSet<V>
where
    K: Clone + Hash + Eq,
    V: Clone + Hash + Eq,
{
    let previous = forward.remove(key).unwrap_or_default();

    for value in previous.iter().filter(|v| !values.contains(*v)) {
        if let Some(keys) = reverse.get_mut(value) {
            keys.remove(key);
            if keys.is_empty() {
                reverse.remove(value);
            }
        }
    }
    for value in values.iter() {
        reverse
            .entry(value.clone())
            .or_default()
            .insert(key.clone());
    }

    if !values.is_empty() {
        forward.insert(key.clone(), values);
    }
    previous
}
