use crate::GroupVersionKind;
use fleet_controller_k8s_api::{self as k8s, ObservedResource};

/// The latest state a drift detector observed on a cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub resources: Vec<ObservedResource>,

    /// Kinds the detector watches. Empty means every kind.
    pub watched_kinds: Vec<GroupVersionKind>,
}

// === impl DriftReport ===

impl DriftReport {
    pub fn from_spec(spec: &k8s::DriftReportSpec) -> Self {
        Self {
            resources: spec.resources.clone(),
            watched_kinds: spec
                .watched_kinds
                .iter()
                .filter_map(|k| k.parse().ok())
                .collect(),
        }
    }

    pub fn watches(&self, gvk: &GroupVersionKind) -> bool {
        self.watched_kinds.is_empty() || self.watched_kinds.contains(gvk)
    }

    fn observed(&self) -> impl Iterator<Item = (GroupVersionKind, &ObservedResource)> + '_ {
        self.resources.iter().map(|r| {
            (
                GroupVersionKind::new(&r.group, &r.version, &r.kind),
                r,
            )
        })
    }

    /// Returns the deployed kinds that have drifted: kinds that are watched
    /// but no longer observed, and kinds with an observed resource that has
    /// diverged.
    ///
    /// `deployed` holds `Kind.version.group` keys; malformed keys are
    /// ignored.
    pub fn drifted(&self, deployed: &[String]) -> Vec<GroupVersionKind> {
        deployed
            .iter()
            .filter_map(|key| key.parse::<GroupVersionKind>().ok())
            .filter(|gvk| {
                let mut observed = self.observed().filter(|(k, _)| k == gvk).peekable();
                let missing = self.watches(gvk) && observed.peek().is_none();
                missing || observed.any(|(_, r)| r.diverged)
            })
            .collect()
    }

    pub fn drifts_from(&self, deployed: &[String]) -> bool {
        !self.drifted(deployed).is_empty()
    }
}
