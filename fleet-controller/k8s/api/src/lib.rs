#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod drift_report;
pub mod fleet_policy;
pub mod labels;
pub mod machine;
pub mod pairing;

pub use self::{
    cluster::{Cluster, ClusterSpec, ClusterStatus, ManagedCluster, ManagedClusterSpec},
    drift_report::{DriftReport, DriftReportSpec, ObservedResource},
    fleet_policy::{FeatureId, FeatureSpec, FleetPolicy, FleetPolicySpec, SyncMode},
    labels::{Labels, Selector, SelectorError},
    machine::Machine,
    pairing::{FeatureStatus, FeatureSummary, Pairing, PairingSpec, PairingStatus},
};
pub use k8s_openapi::{
    api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::Time, chrono,
};
pub use kube::{
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, Preconditions},
    Client, Error, Resource, ResourceExt,
};
