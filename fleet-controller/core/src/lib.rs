#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod apply;
pub mod catalog;
pub mod companion;
pub mod drift;
mod gvk;
mod ordered_set;
mod refs;
pub mod store;
pub mod sync;

pub use self::{
    apply::{ApplyError, ApplyMode, FeatureApplier},
    catalog::{Catalog, Cluster, Feature, Policy},
    companion::{CompanionRequest, CompanionSink, RunMode},
    drift::DriftReport,
    gvk::{GroupVersionKind, ParseGroupVersionKindError},
    ordered_set::OrderedSet,
    refs::{ClusterRef, PairingKey, PolicyRef},
    store::{PairingStore, StoreError, Stored},
};
pub use fleet_controller_k8s_api::{FeatureId, FeatureStatus, FeatureSummary, PairingStatus, SyncMode};
