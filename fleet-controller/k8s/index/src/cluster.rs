use crate::index::{Change, Index, Machine};
use fleet_controller_core::{Cluster, ClusterRef};
use fleet_controller_k8s_api::{self as k8s, cluster::kubeconfig_secret_name, Labels, ResourceExt};

/// Converts a Cluster API cluster. Returns `None` if the resource has no
/// namespace.
pub fn capi_cluster(resource: &k8s::Cluster) -> Option<Cluster> {
    let namespace = resource.namespace()?;
    let name = resource.name_unchecked();
    Some(Cluster {
        id: ClusterRef::capi(namespace, &name),
        labels: Labels::from(resource.labels().clone()),
        ready: resource.is_ready(),
        credentials: kubeconfig_secret_name(&name),
    })
}

/// Converts a `ManagedCluster`. Returns `None` if the resource has no
/// namespace.
pub fn managed_cluster(resource: &k8s::ManagedCluster) -> Option<Cluster> {
    let namespace = resource.namespace()?;
    let name = resource.name_unchecked();
    let credentials = resource
        .spec
        .kubeconfig_secret
        .clone()
        .unwrap_or_else(|| kubeconfig_secret_name(&name));
    Some(Cluster {
        id: ClusterRef::of::<k8s::ManagedCluster>(namespace, name),
        labels: Labels::from(resource.labels().clone()),
        ready: resource.is_ready(),
        credentials,
    })
}

pub fn machine(resource: &k8s::Machine) -> Machine {
    Machine {
        namespace: resource.namespace().unwrap_or_default(),
        name: resource.name_unchecked(),
        labels: Labels::from(resource.labels().clone()),
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Cluster> for Index {
    fn apply(&mut self, resource: k8s::Cluster) {
        match capi_cluster(&resource) {
            Some(cluster) => self.map_and_enqueue(Change::Cluster(cluster)),
            None => tracing::warn!(name = %resource.name_any(), "Cluster has no namespace"),
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.map_and_enqueue(Change::ClusterDeleted(ClusterRef::capi(namespace, name)));
    }
}

impl kubert::index::IndexNamespacedResource<k8s::ManagedCluster> for Index {
    fn apply(&mut self, resource: k8s::ManagedCluster) {
        match managed_cluster(&resource) {
            Some(cluster) => self.map_and_enqueue(Change::Cluster(cluster)),
            None => tracing::warn!(name = %resource.name_any(), "ManagedCluster has no namespace"),
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.map_and_enqueue(Change::ClusterDeleted(ClusterRef::of::<
            k8s::ManagedCluster,
        >(namespace, name)));
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Machine> for Index {
    fn apply(&mut self, resource: k8s::Machine) {
        self.map_and_enqueue(Change::Machine(machine(&resource)));
    }

    // A deleted machine may change its cluster's readiness, but the cluster
    // resource reports that change itself.
    fn delete(&mut self, _namespace: String, _name: String) {}
}
