use crate::{FeatureId, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label recording the name of the pairing an object belongs to.
pub const PAIRING_NAME_LABEL: &str = "fleet.projectfleet.io/pairing-name";

/// Label recording the name of the policy an object was created for.
pub const POLICY_NAME_LABEL: &str = "fleet.projectfleet.io/policy-name";

/// Records the deployment state of one policy on one cluster.
///
/// Pairings live in the cluster's namespace and are named by
/// [`pairing_name`].
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.projectfleet.io",
    version = "v1alpha1",
    kind = "Pairing",
    namespaced,
    status = "PairingStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PairingSpec {
    pub policy_name: String,
    pub cluster_api_version: String,
    pub cluster_kind: String,
    pub cluster_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PairingStatus {
    /// False once the policy's selector no longer selects the cluster.
    #[serde(default = "matching_default")]
    pub matching: bool,

    /// At most one entry per feature. Always serialized so that merge
    /// patches replace the whole list.
    #[serde(default)]
    pub feature_summaries: Vec<FeatureSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSummary {
    pub feature_id: FeatureId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FeatureStatus>,

    /// SHA-256 of the feature's content when it was last applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<Time>,

    /// Kinds deployed by this feature, as `Kind.version.group` keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployed_group_version_kind: Vec<String>,

    /// Set when the recorded state was produced by a simulated deployment.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum FeatureStatus {
    Provisioning,
    Provisioned,
    Failed,
    Removed,
}

/// Builds the name of the pairing between `policy` and a cluster.
pub fn pairing_name(policy: &str, cluster_kind: &str, cluster: &str) -> String {
    format!("{}--{}--{}", policy, cluster_kind, cluster).to_lowercase()
}

fn matching_default() -> bool {
    true
}

// === impl PairingStatus ===

impl Default for PairingStatus {
    fn default() -> Self {
        Self {
            matching: true,
            feature_summaries: Vec::new(),
        }
    }
}

impl PairingStatus {
    pub fn feature(&self, id: FeatureId) -> Option<&FeatureSummary> {
        self.feature_summaries.iter().find(|f| f.feature_id == id)
    }
}

// === impl FeatureSummary ===

impl FeatureSummary {
    pub fn new(feature_id: FeatureId) -> Self {
        Self {
            feature_id,
            status: None,
            hash: None,
            failure_reason: None,
            failure_message: None,
            last_applied_time: None,
            deployed_group_version_kind: Vec::new(),
            dry_run: false,
        }
    }
}

// === impl FeatureStatus ===

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => "Provisioning".fmt(f),
            Self::Provisioned => "Provisioned".fmt(f),
            Self::Failed => "Failed".fmt(f),
            Self::Removed => "Removed".fmt(f),
        }
    }
}
