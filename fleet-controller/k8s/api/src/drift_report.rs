use crate::PairingSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Published by the drift detector running on a managed cluster. Shares its
/// name and namespace with the pairing it reports on.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.projectfleet.io",
    version = "v1alpha1",
    kind = "DriftReport",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DriftReportSpec {
    #[serde(flatten)]
    pub pairing: PairingSpec,

    /// Resources currently observed on the cluster.
    #[serde(default)]
    pub resources: Vec<ObservedResource>,

    /// `Kind.version.group` keys the detector watches. Empty means every
    /// kind is watched.
    #[serde(default)]
    pub watched_kinds: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservedResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,

    /// Set when the resource no longer matches what was deployed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub diverged: bool,
}
