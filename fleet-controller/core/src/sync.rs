//! Decides, per feature, whether a reconciliation pass deploys.

use crate::{DriftReport, FeatureStatus, FeatureSummary, SyncMode};
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The cluster cannot accept deployments; leave everything untouched.
    Defer,
    /// The recorded state is current.
    Keep,
    Apply(Reason),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// The feature has never been deployed.
    New,
    /// The feature's content changed since it was last deployed.
    HashChanged,
    /// The last deployment failed.
    RetryFailed,
    /// A previous pass stopped before recording an outcome.
    Interrupted,
    /// The cluster's state diverged from what was deployed.
    Drift,
    /// Dry-run policies simulate on every pass.
    DryRun,
    /// The recorded state came from a simulation and must be made real.
    LeaveDryRun,
}

/// Decides what to do with one feature of a pairing.
///
/// `stored` is the feature's recorded summary, if any, and `desired_hash` the
/// hash of its current content. `drift` is only consulted for
/// `ContinuousWithDriftDetection`.
pub fn decide(
    mode: SyncMode,
    stored: Option<&FeatureSummary>,
    desired_hash: &[u8],
    drift: Option<&DriftReport>,
    cluster_ready: bool,
) -> Decision {
    if !cluster_ready {
        return Decision::Defer;
    }
    if mode == SyncMode::DryRun {
        return Decision::Apply(Reason::DryRun);
    }

    let stored = match stored {
        Some(stored) if stored.dry_run => return Decision::Apply(Reason::LeaveDryRun),
        Some(stored) => stored,
        None => return Decision::Apply(Reason::New),
    };
    match stored.status {
        None | Some(FeatureStatus::Removed) => return Decision::Apply(Reason::New),
        Some(FeatureStatus::Failed) => return Decision::Apply(Reason::RetryFailed),
        Some(FeatureStatus::Provisioning) => return Decision::Apply(Reason::Interrupted),
        Some(FeatureStatus::Provisioned) => {}
    }

    if stored.hash.as_deref() != Some(desired_hash) {
        return Decision::Apply(Reason::HashChanged);
    }

    match mode {
        SyncMode::ContinuousWithDriftDetection => {
            let drifted = drift
                .map(|r| r.drifts_from(&stored.deployed_group_version_kind))
                .unwrap_or(false);
            if drifted {
                Decision::Apply(Reason::Drift)
            } else {
                Decision::Keep
            }
        }
        SyncMode::OneTime | SyncMode::Continuous | SyncMode::DryRun => Decision::Keep,
    }
}

/// Whether a feature may move from `from` to `to`.
///
/// Rewriting the current status is always allowed.
pub fn is_valid_transition(from: Option<FeatureStatus>, to: FeatureStatus) -> bool {
    use FeatureStatus::*;

    match (from, to) {
        (Some(from), to) if from == to => true,
        (_, Removed) => true,
        (None | Some(Removed) | Some(Provisioned) | Some(Failed), Provisioning) => true,
        (Some(Provisioning), Provisioned | Failed) => true,
        _ => false,
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::HashChanged => "hash-changed",
            Self::RetryFailed => "retry-failed",
            Self::Interrupted => "interrupted",
            Self::Drift => "drift",
            Self::DryRun => "dry-run",
            Self::LeaveDryRun => "leave-dry-run",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeatureId, GroupVersionKind};
    use fleet_controller_k8s_api::ObservedResource;
    use rstest::rstest;

    const HASH: &[u8] = b"current";

    fn summary(status: FeatureStatus, hash: &[u8]) -> FeatureSummary {
        let mut s = FeatureSummary::new(FeatureId::Resources);
        s.status = Some(status);
        s.hash = Some(hash.to_vec());
        s.deployed_group_version_kind = vec!["Deployment.v1.apps".to_string()];
        s
    }

    fn drifted_report() -> DriftReport {
        DriftReport {
            resources: vec![ObservedResource {
                group: "apps".to_string(),
                version: "v1".to_string(),
                kind: "Deployment".to_string(),
                namespace: "default".to_string(),
                name: "web".to_string(),
                diverged: true,
            }],
            watched_kinds: vec![GroupVersionKind::new("apps", "v1", "Deployment")],
        }
    }

    #[rstest]
    #[case(SyncMode::OneTime)]
    #[case(SyncMode::Continuous)]
    #[case(SyncMode::ContinuousWithDriftDetection)]
    #[case(SyncMode::DryRun)]
    fn defers_until_ready(#[case] mode: SyncMode) {
        assert_eq!(decide(mode, None, HASH, None, false), Decision::Defer);
    }

    #[rstest]
    #[case(SyncMode::OneTime)]
    #[case(SyncMode::Continuous)]
    #[case(SyncMode::ContinuousWithDriftDetection)]
    fn applies_new_and_changed_features(#[case] mode: SyncMode) {
        assert_eq!(
            decide(mode, None, HASH, None, true),
            Decision::Apply(Reason::New)
        );
        let stale = summary(FeatureStatus::Provisioned, b"old");
        assert_eq!(
            decide(mode, Some(&stale), HASH, None, true),
            Decision::Apply(Reason::HashChanged)
        );
        let current = summary(FeatureStatus::Provisioned, HASH);
        assert_eq!(decide(mode, Some(&current), HASH, None, true), Decision::Keep);
    }

    #[test]
    fn retries_failures() {
        let failed = summary(FeatureStatus::Failed, HASH);
        assert_eq!(
            decide(SyncMode::Continuous, Some(&failed), HASH, None, true),
            Decision::Apply(Reason::RetryFailed)
        );
    }

    #[test]
    fn one_time_ignores_drift() {
        let current = summary(FeatureStatus::Provisioned, HASH);
        let report = drifted_report();
        assert_eq!(
            decide(SyncMode::OneTime, Some(&current), HASH, Some(&report), true),
            Decision::Keep
        );
        assert_eq!(
            decide(SyncMode::Continuous, Some(&current), HASH, Some(&report), true),
            Decision::Keep
        );
    }

    #[test]
    fn drift_detection_redeploys() {
        let current = summary(FeatureStatus::Provisioned, HASH);
        let report = drifted_report();
        assert_eq!(
            decide(
                SyncMode::ContinuousWithDriftDetection,
                Some(&current),
                HASH,
                Some(&report),
                true
            ),
            Decision::Apply(Reason::Drift)
        );
        assert_eq!(
            decide(
                SyncMode::ContinuousWithDriftDetection,
                Some(&current),
                HASH,
                Some(&DriftReport {
                    resources: vec![ObservedResource {
                        diverged: false,
                        ..drifted_report().resources[0].clone()
                    }],
                    watched_kinds: vec![],
                }),
                true
            ),
            Decision::Keep
        );
    }

    #[test]
    fn dry_run_always_simulates_and_leaving_forces_apply() {
        let current = summary(FeatureStatus::Provisioned, HASH);
        assert_eq!(
            decide(SyncMode::DryRun, Some(&current), HASH, None, true),
            Decision::Apply(Reason::DryRun)
        );

        let simulated = FeatureSummary {
            dry_run: true,
            ..current
        };
        assert_eq!(
            decide(SyncMode::Continuous, Some(&simulated), HASH, None, true),
            Decision::Apply(Reason::LeaveDryRun)
        );
    }

    #[test]
    fn transitions() {
        use FeatureStatus::*;

        assert!(is_valid_transition(None, Provisioning));
        assert!(is_valid_transition(Some(Provisioning), Provisioned));
        assert!(is_valid_transition(Some(Provisioning), Failed));
        assert!(is_valid_transition(Some(Provisioned), Provisioning));
        assert!(is_valid_transition(Some(Failed), Provisioning));
        assert!(is_valid_transition(Some(Provisioned), Removed));
        assert!(is_valid_transition(Some(Failed), Failed));

        assert!(!is_valid_transition(None, Provisioned));
        assert!(!is_valid_transition(Some(Provisioned), Failed));
        assert!(!is_valid_transition(Some(Failed), Provisioned));
        assert!(!is_valid_transition(Some(Removed), Provisioned));
    }
}
