//! The sidecar-proxy controller: derives a `ProxyStateTemplate` for every
//! mesh-enabled workload from the workload itself, the destinations it
//! declares, the routes of those destinations and the proxy configurations
//! and traffic permissions that apply to it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod fetcher;
mod intermediate;
mod mappers;
mod reconciler;
pub mod status;

#[cfg(test)]
mod tests;

pub use self::{
    intermediate::Destination,
    mappers::Mapper,
    reconciler::{Reconciler, TrustDomainFetcher},
};
use mesh_controller_core::{controller::Controller, SharedStore, Type};
use mesh_controller_index::Caches;
use std::sync::Arc;

pub const CONTROLLER_NAME: &str = "sidecar-proxy";

/// The resource types whose changes can affect a proxy's template.
pub const WATCHED_TYPES: [Type; 9] = [
    Type::Workload,
    Type::Service,
    Type::ServiceEndpoints,
    Type::ComputedRoutes,
    Type::ComputedExplicitDestinations,
    Type::ComputedImplicitDestinations,
    Type::ComputedTrafficPermissions,
    Type::ProxyConfiguration,
    Type::ProxyStateTemplate,
];

#[derive(Clone, Debug)]
pub struct Config {
    /// The datacenter this controller runs in. Destinations in any other
    /// datacenter are rejected.
    pub datacenter: String,

    /// Whether traffic is allowed when no traffic permissions select a
    /// workload's identity.
    pub default_allow: bool,

    /// When an identity has no computed implicit destinations, treat every
    /// routable service in the partition as an implicit destination.
    pub implicit_destinations_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datacenter: "dc1".to_string(),
            default_allow: false,
            implicit_destinations_fallback: true,
        }
    }
}

/// Registers the sidecar-proxy controller's watches and reconciler.
pub fn controller(
    store: SharedStore,
    caches: Caches,
    config: Config,
    trust_domain: TrustDomainFetcher,
) -> Controller {
    let mapper = Arc::new(Mapper::new(
        store.clone(),
        caches.clone(),
        config.implicit_destinations_fallback,
    ));
    let reconciler = Reconciler::new(store, caches, config, trust_domain);

    WATCHED_TYPES
        .iter()
        .fold(
            Controller::new(CONTROLLER_NAME, Type::ProxyStateTemplate),
            |controller, ty| controller.with_watch(*ty, mapper.clone()),
        )
        .with_reconciler(Arc::new(reconciler))
}
