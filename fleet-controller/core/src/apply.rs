use crate::{Cluster, Feature, GroupVersionKind};
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    Apply,
    /// Validate the feature against the cluster without persisting anything.
    DryRun,
}

/// A failed deployment, recorded on the feature's summary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct ApplyError {
    pub reason: String,
    pub message: String,

    /// Kinds that were deployed before the failure.
    pub deployed: Vec<GroupVersionKind>,
}

/// Deploys features to clusters.
#[async_trait::async_trait]
pub trait FeatureApplier: Send + Sync {
    /// Applies every manifest in `feature`, returning the kinds that were
    /// (or, in dry-run mode, would be) deployed.
    async fn apply(
        &self,
        cluster: &Cluster,
        feature: &Feature,
        mode: ApplyMode,
    ) -> Result<Vec<GroupVersionKind>, ApplyError>;
}

// === impl ApplyError ===

impl ApplyError {
    pub fn new(reason: impl Into<String>, message: impl ToString) -> Self {
        Self {
            reason: reason.into(),
            message: message.to_string(),
            deployed: Vec::new(),
        }
    }

    pub fn with_deployed(self, deployed: Vec<GroupVersionKind>) -> Self {
        Self { deployed, ..self }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            "ApplyTimeout",
            format!("deployment did not complete within {}ms", after.as_millis()),
        )
    }
}
