use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The subset of a Cluster API `Cluster` that the controller reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub control_plane_ready: bool,
    #[serde(default)]
    pub infrastructure_ready: bool,
}

/// A cluster registered directly with the controller rather than provisioned
/// through Cluster API.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.projectfleet.io",
    version = "v1alpha1",
    kind = "ManagedCluster",
    namespaced,
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Name of the Secret, in the cluster's namespace, holding a kubeconfig
    /// under the `value` key. Defaults to `<name>-kubeconfig`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// The default name of the Secret holding a cluster's kubeconfig.
pub fn kubeconfig_secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

// === impl Cluster ===

impl Cluster {
    /// A Cluster API cluster accepts deployments once its control plane is
    /// up and reconciliation has not been paused.
    pub fn is_ready(&self) -> bool {
        !self.spec.paused.unwrap_or(false)
            && self
                .status
                .as_ref()
                .map(|s| s.control_plane_ready)
                .unwrap_or(false)
    }
}

// === impl ManagedCluster ===

impl ManagedCluster {
    pub fn is_ready(&self) -> bool {
        !self.spec.paused.unwrap_or(false)
            && self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}
