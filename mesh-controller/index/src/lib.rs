//! Reverse indexes that let the sidecar controller find every proxy affected
//! by a change without scanning the resource store.
//!
//! The caches accelerate lookups but are never the source of truth: each one
//! may lag the store, and the controller repairs them as it reconciles.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bimapper;
mod computed_routes;
mod destinations;
mod identities;
mod implicit_destinations;
pub mod metrics;
mod proxy_configuration;
mod workload_selection;

#[cfg(test)]
mod tests;

pub use self::{
    bimapper::BiMapper,
    computed_routes::ComputedRoutesCache,
    destinations::{DestinationKey, DestinationRef, DestinationsCache},
    identities::IdentitiesCache,
    implicit_destinations::ImplicitDestinationsCache,
    proxy_configuration::ProxyConfigurationCache,
    workload_selection::WorkloadSelectionCache,
};
use mesh_controller_core::Reference;
use std::sync::Arc;

/// Handles to every cache the sidecar controller maintains.
#[derive(Clone, Debug, Default)]
pub struct Caches {
    pub destinations: Arc<DestinationsCache>,
    pub proxy_configurations: Arc<ProxyConfigurationCache>,
    pub identities: Arc<IdentitiesCache>,
    pub computed_routes: Arc<ComputedRoutesCache>,
    pub implicit_destinations: Arc<ImplicitDestinationsCache>,
    pub workload_selection: Arc<WorkloadSelectionCache>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything known about a proxy.
    pub fn untrack_proxy(&self, proxy: &Reference) {
        tracing::debug!(%proxy, "untracking proxy");
        self.destinations.delete_source_proxy(proxy);
        self.proxy_configurations.untrack_proxy_id(proxy);
        self.identities.untrack_proxy_id(proxy);
    }
}
