use crate::index::{Change, Index};
use fleet_controller_core::{Feature, Policy, PolicyRef};
use fleet_controller_k8s_api::{self as k8s, ResourceExt};

/// Converts a `FleetPolicy` resource into a policy.
pub fn policy(resource: &k8s::FleetPolicy) -> Policy {
    let k8s::FleetPolicySpec {
        cluster_selector,
        sync_mode,
        features,
    } = &resource.spec;

    Policy {
        id: PolicyRef::fleet_policy(resource.name_unchecked()),
        selector: cluster_selector.clone(),
        sync_mode: *sync_mode,
        features: features
            .iter()
            .map(|f| Feature {
                id: f.id,
                manifests: f.manifests.clone(),
            })
            .collect(),
    }
}

impl kubert::index::IndexClusterResource<k8s::FleetPolicy> for Index {
    fn apply(&mut self, resource: k8s::FleetPolicy) {
        self.map_and_enqueue(Change::Policy(policy(&resource)));
    }

    fn delete(&mut self, name: String) {
        self.map_and_enqueue(Change::PolicyDeleted(PolicyRef::fleet_policy(name)));
    }
}
