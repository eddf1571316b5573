//! Fleet controller index
//!
//! Tracks which policies select which clusters and turns every resource
//! change into the set of pairings that must be reconciled. It watches the
//! following resources:
//!
//! - Each `FleetPolicy` carries a cluster selector. When a policy changes we
//!   re-evaluate its selector against every known cluster.
//! - Each `Cluster` and `ManagedCluster` carries labels. When a cluster
//!   changes we re-evaluate every policy's selector against its labels.
//! - Each `Machine` belongs to a Cluster API cluster. Machine changes affect
//!   the owning cluster's readiness, so they requeue that cluster's pairings.
//!
//! ```text
//! [ FleetPolicy ] -> selector -> [ MatchIndex ] <- labels <- [ Cluster ]
//! ```
//!
//! The match index stores both directions of the relation and keeps them in
//! agreement. Work items are sent, as [`PairingKey`]s, on an unbounded
//! channel to the status controller.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod catalog;
pub mod cluster;
mod index;
mod match_index;
pub mod metrics;
pub mod policy;


pub use self::{
    catalog::IndexCatalog,
    index::{Change, Index, Machine, SharedIndex},
    match_index::{InvariantViolation, MatchIndex},
};
pub use fleet_controller_core::PairingKey;
