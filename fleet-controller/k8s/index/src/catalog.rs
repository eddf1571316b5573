use crate::SharedIndex;
use fleet_controller_core::{Catalog, Cluster, ClusterRef, PairingKey, Policy, PolicyRef};
use std::sync::Arc;

/// Serves reconciler lookups from the index.
#[derive(Clone, Debug)]
pub struct IndexCatalog(SharedIndex);

impl IndexCatalog {
    pub fn new(index: SharedIndex) -> Self {
        Self(index)
    }
}

impl Catalog for IndexCatalog {
    fn policy(&self, id: &PolicyRef) -> Option<Arc<Policy>> {
        self.0.read().policy(id)
    }

    fn cluster(&self, id: &ClusterRef) -> Option<Arc<Cluster>> {
        self.0.read().cluster(id)
    }

    fn is_matched(&self, key: &PairingKey) -> bool {
        let matches = self.0.read().matches().clone();
        matches.contains(key)
    }

    fn is_retired(&self, key: &PairingKey) -> bool {
        self.0.read().is_retired(key)
    }
}
