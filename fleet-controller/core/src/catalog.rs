use crate::{ClusterRef, FeatureId, PairingKey, PolicyRef, SyncMode};
use fleet_controller_k8s_api::Labels;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A cluster as seen by the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub id: ClusterRef,
    pub labels: Labels,

    /// Whether the cluster accepts deployments.
    pub ready: bool,

    /// Name of the Secret, in the cluster's namespace, holding credentials
    /// for reaching the cluster.
    pub credentials: String,
}

/// A policy as seen by the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub id: PolicyRef,

    /// The unparsed cluster selector.
    pub selector: String,

    pub sync_mode: SyncMode,
    pub features: Vec<Feature>,
}

/// A unit of deployable content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feature {
    pub id: FeatureId,
    pub manifests: Vec<String>,
}

/// Read access to the latest known policies, clusters, and matches.
pub trait Catalog: Send + Sync {
    fn policy(&self, id: &PolicyRef) -> Option<Arc<Policy>>;

    fn cluster(&self, id: &ClusterRef) -> Option<Arc<Cluster>>;

    /// Whether the policy's selector currently selects the cluster.
    fn is_matched(&self, key: &PairingKey) -> bool;

    /// Whether the policy or the cluster was deleted after being observed.
    /// A policy or cluster that was never observed is not retired.
    fn is_retired(&self, key: &PairingKey) -> bool;
}

// === impl Feature ===

impl Feature {
    /// Hashes the feature's rendered content. Any change to a manifest, or
    /// to their order, changes the hash.
    pub fn hash(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_str().as_bytes());
        for manifest in &self.manifests {
            hasher.update((manifest.len() as u64).to_be_bytes());
            hasher.update(manifest.as_bytes());
        }
        hasher.finalize().to_vec()
    }
}
