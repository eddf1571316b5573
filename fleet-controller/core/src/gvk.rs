use std::{fmt, str::FromStr};

/// Identifies a kind of resource deployed to a cluster.
///
/// Recorded in feature summaries as `Kind.version.group`; the core group is
/// empty, so a ConfigMap is recorded as `ConfigMap.v1.`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid group-version-kind key {0:?}")]
pub struct ParseGroupVersionKindError(String);

// === impl GroupVersionKind ===

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Builds a kind from a manifest's `apiVersion` (`group/version`, or just
    /// `version` for the core group).
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind, self.version, self.group)
    }
}

impl FromStr for GroupVersionKind {
    type Err = ParseGroupVersionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(version), Some(group)) if !kind.is_empty() && !version.is_empty() => {
                Ok(Self::new(group, version, kind))
            }
            _ => Err(ParseGroupVersionKindError(s.to_string())),
        }
    }
}
