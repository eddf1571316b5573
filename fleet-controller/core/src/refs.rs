use fleet_controller_k8s_api::{self as k8s, Resource};
use std::fmt;

/// Identifies a cluster of any supported kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Identifies a policy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Identifies the pairing of one policy with one cluster. This is the unit
/// of reconciliation work.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingKey {
    pub policy: PolicyRef,
    pub cluster: ClusterRef,
}

// === impl ClusterRef ===

impl ClusterRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// References a resource of kind `K` by namespace and name.
    pub fn of<K: Resource<DynamicType = ()>>(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }

    /// References a Cluster API cluster.
    pub fn capi(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::of::<k8s::Cluster>(namespace, name)
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// === impl PolicyRef ===

impl PolicyRef {
    pub fn fleet_policy(name: impl Into<String>) -> Self {
        Self {
            api_version: k8s::FleetPolicy::api_version(&()).into_owned(),
            kind: k8s::FleetPolicy::kind(&()).into_owned(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

// === impl PairingKey ===

impl PairingKey {
    pub fn new(policy: PolicyRef, cluster: ClusterRef) -> Self {
        Self { policy, cluster }
    }

    /// Recovers a key from the spec of a pairing or drift report stored in
    /// `namespace`.
    pub fn from_spec(namespace: impl Into<String>, spec: &k8s::PairingSpec) -> Self {
        Self {
            policy: PolicyRef::fleet_policy(&spec.policy_name),
            cluster: ClusterRef::new(
                &spec.cluster_api_version,
                &spec.cluster_kind,
                namespace,
                &spec.cluster_name,
            ),
        }
    }

    pub fn to_spec(&self) -> k8s::PairingSpec {
        k8s::PairingSpec {
            policy_name: self.policy.name.clone(),
            cluster_api_version: self.cluster.api_version.clone(),
            cluster_kind: self.cluster.kind.clone(),
            cluster_name: self.cluster.name.clone(),
        }
    }

    /// Name of the pairing resource, which lives in the cluster's namespace.
    pub fn pairing_name(&self) -> String {
        k8s::pairing::pairing_name(&self.policy.name, &self.cluster.kind, &self.cluster.name)
    }
}

impl fmt::Display for PairingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.policy, self.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn spec_round_trip() {
        let key = PairingKey::new(
            PolicyRef::fleet_policy("baseline"),
            ClusterRef::capi("fleet", "prod"),
        );
        assert_eq!(key.cluster.api_version, "cluster.x-k8s.io/v1beta1");
        assert_eq!(key.cluster.kind, "Cluster");
        assert_eq!(key.policy.api_version, "fleet.projectfleet.io/v1alpha1");
        assert_eq!(PairingKey::from_spec("fleet", &key.to_spec()), key);
        assert_eq!(key.pairing_name(), "baseline--cluster--prod");
    }
}
