#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use fleet_controller_core as core;
pub use fleet_controller_k8s_api as k8s;
pub use fleet_controller_k8s_index as index;
pub use fleet_controller_k8s_status as status;

mod applier;
mod args;
mod store;

pub use self::{applier::KubeApplier, args::Args, store::KubeStore};
