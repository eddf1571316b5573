use crate::{Cluster, ClusterRef};
use std::{fmt, str::FromStr};

/// How the drift detector reports back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Publish drift reports to the management cluster.
    #[default]
    SendUpdates,
    /// Keep drift reports on the managed cluster.
    DoNotSendUpdates,
}

/// Asks for the drift detector to be running on a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompanionRequest {
    pub cluster: ClusterRef,
    pub run_mode: RunMode,

    /// Rendered deployment manifest for the detector.
    pub manifest: String,
}

/// Installs the drift detector on managed clusters.
#[async_trait::async_trait]
pub trait CompanionSink: Send + Sync {
    /// Ensures the detector described by `request` is deployed. Must be
    /// idempotent.
    async fn ensure(&self, cluster: &Cluster, request: CompanionRequest) -> anyhow::Result<()>;
}

// === impl RunMode ===

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendUpdates => "send-updates",
            Self::DoNotSendUpdates => "do-not-send-updates",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send-updates" => Ok(Self::SendUpdates),
            "do-not-send-updates" => Ok(Self::DoNotSendUpdates),
            s => anyhow::bail!("invalid run mode: {s}"),
        }
    }
}
