#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_controller_core as core;
pub use mesh_controller_index as index;
pub use mesh_controller_sidecar as sidecar;

pub mod admin;
mod args;
pub mod manager;
pub mod metrics;
pub mod queue;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    manager::{Manager, ManagerConfig},
    metrics::ControllerMetrics,
    queue::{Backoff, Outcome, Queue},
};
