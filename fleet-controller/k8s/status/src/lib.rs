//! Fleet controller status
//!
//! Reconciles pairings: for each [`PairingKey`] received from the index, the
//! [`Controller`] runs a [`Reconciler`] pass that loads the pairing's status
//! through a [`PairingScope`], decides per feature whether to deploy, applies
//! what is needed, and persists the result with optimistic concurrency.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod companion;
mod controller;
mod drift;
mod metrics;
mod reconcile;
mod scope;

#[cfg(test)]
mod tests;

pub use self::{
    companion::CompanionConfig,
    controller::{Controller, ControllerConfig},
    drift::{DriftChannel, DriftIngest},
    metrics::ControllerMetrics,
    reconcile::{Pass, ReconcileError, Reconciler, ReconcilerConfig},
    scope::{PairingScope, Transition},
};
pub use fleet_controller_core::PairingKey;
