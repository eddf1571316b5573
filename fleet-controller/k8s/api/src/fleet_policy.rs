use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a set of features to deploy on every cluster whose labels match
/// `clusterSelector`.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fleet.projectfleet.io",
    version = "v1alpha1",
    kind = "FleetPolicy"
)]
#[serde(rename_all = "camelCase")]
pub struct FleetPolicySpec {
    /// A label selector in `key=value,key in (a,b)` form. Empty selects every
    /// cluster.
    #[serde(default)]
    pub cluster_selector: String,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default)]
    pub features: Vec<FeatureSpec>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SyncMode {
    /// Deploy once; later drift is not corrected.
    OneTime,
    #[default]
    Continuous,
    /// Like `Continuous`, and also redeploys when a drift report shows the
    /// cluster's state has diverged.
    ContinuousWithDriftDetection,
    /// Simulate deployments without changing the cluster.
    DryRun,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    pub id: FeatureId,

    /// Rendered YAML documents, applied in order.
    #[serde(default)]
    pub manifests: Vec<String>,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum FeatureId {
    Resources,
    Helm,
    Kustomize,
}

// === impl FeatureId ===

impl FeatureId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resources => "Resources",
            Self::Helm => "Helm",
            Self::Kustomize => "Kustomize",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl SyncMode ===

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneTime => "OneTime".fmt(f),
            Self::Continuous => "Continuous".fmt(f),
            Self::ContinuousWithDriftDetection => "ContinuousWithDriftDetection".fmt(f),
            Self::DryRun => "DryRun".fmt(f),
        }
    }
}
