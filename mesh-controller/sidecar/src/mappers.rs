//! Maps changes to watched resources onto the proxy state templates they
//! affect.
//!
//! Mapping keeps the caches current as a side effect: each handler tracks the
//! new state of the resource before it consults the caches, and untracks a
//! deleted resource after it has used its last known links.

use ahash::AHashSet as HashSet;
use anyhow::Result;
use mesh_controller_core::{
    catalog::{Service, Workload, WorkloadSelector},
    mesh::{
        ComputedExplicitDestinations, ComputedImplicitDestinations, ComputedRoutes,
        ProxyConfiguration,
    },
    Id, MapResource, Reference, Request, Resource, SharedStore, Tenancy, Type,
};
use mesh_controller_index::{Caches, DestinationKey};
use tracing::debug;

#[derive(Clone)]
pub struct Mapper {
    store: SharedStore,
    caches: Caches,
    implicit_destinations_fallback: bool,
}

// === impl Mapper ===

impl Mapper {
    pub fn new(store: SharedStore, caches: Caches, implicit_destinations_fallback: bool) -> Self {
        Self {
            store,
            caches,
            implicit_destinations_fallback,
        }
    }

    async fn map_event(&self, resource: &Resource, deleted: bool) -> Result<Vec<Request>> {
        let mut ids = match resource.id.ty {
            Type::Workload => self.map_workload(resource, deleted)?,
            Type::Service => self.map_service_change(resource, deleted).await?,
            Type::ServiceEndpoints => {
                self.map_service(&resource.reference().replace_type(Type::Service))
            }
            Type::ComputedRoutes => self.map_computed_routes(resource, deleted)?,
            Type::ComputedExplicitDestinations => {
                self.map_explicit_destinations(resource, deleted)?
            }
            Type::ComputedImplicitDestinations => {
                self.map_implicit_destinations(resource, deleted)?
            }
            Type::ComputedTrafficPermissions => self.proxies_for_identity(
                &resource.reference().replace_type(Type::WorkloadIdentity),
            ),
            Type::ProxyConfiguration => self.map_proxy_configuration(resource, deleted).await?,
            Type::ProxyStateTemplate => vec![resource.id.replace_type(Type::ProxyStateTemplate)],
            ty => panic!("sidecar-proxy mapper does not watch {ty}"),
        };

        ids.sort();
        ids.dedup();
        debug!(id = %resource.id, deleted, requests = ids.len(), "mapped resource");
        Ok(ids.into_iter().map(Request::new).collect())
    }

    fn map_workload(&self, resource: &Resource, deleted: bool) -> Result<Vec<Id>> {
        let proxy = resource.reference().replace_type(Type::ProxyStateTemplate);
        if deleted {
            self.caches.untrack_proxy(&proxy);
        } else {
            let workload = resource.decode::<Workload>()?;
            if workload.data.identity.is_empty() {
                self.caches.identities.untrack_proxy_id(&proxy);
            } else {
                let identity = Reference::new(
                    Type::WorkloadIdentity,
                    resource.id.tenancy.clone(),
                    workload.data.identity,
                );
                self.caches.identities.track_pair(&identity, &proxy);
            }
        }
        Ok(vec![proxy.to_id()])
    }

    /// A service affects the proxies that route to it and, through port
    /// protocol inheritance, the workloads it selects before and after the
    /// change.
    ///
    /// The selection cache is updated before the store is read, so a failed
    /// read leaves it current for the retry.
    async fn map_service_change(&self, resource: &Resource, deleted: bool) -> Result<Vec<Id>> {
        let service = resource.reference();
        let mut ids = self.map_service(&service);

        let previous = self.caches.workload_selection.selector(&service);
        let current = if deleted {
            self.caches.workload_selection.untrack_service(&service);
            None
        } else {
            let decoded = resource.decode::<Service>()?;
            self.caches
                .workload_selection
                .track_service(&service, &decoded.data.workloads);
            Some(decoded.data.workloads)
        };

        for selector in previous.iter().chain(current.iter()) {
            ids.extend(self.selected_proxies(&service.tenancy, selector).await?);
        }
        Ok(ids)
    }

    fn map_computed_routes(&self, resource: &Resource, deleted: bool) -> Result<Vec<Id>> {
        let routes = resource.reference();
        if deleted {
            self.caches.computed_routes.untrack_computed_routes(&routes);
        } else {
            let decoded = resource.decode::<ComputedRoutes>()?;
            self.caches
                .computed_routes
                .track_computed_routes(&routes, decoded.data.backend_services());
        }
        Ok(self.map_service(&routes.replace_type(Type::Service)))
    }

    fn map_explicit_destinations(&self, resource: &Resource, deleted: bool) -> Result<Vec<Id>> {
        let proxy = resource.reference().replace_type(Type::ProxyStateTemplate);
        if deleted {
            self.caches.destinations.delete_source_proxy(&proxy);
        } else {
            let decoded = resource.decode::<ComputedExplicitDestinations>()?;
            let keys = decoded
                .data
                .destinations
                .into_iter()
                .filter(|d| d.destination_ref.ty == Type::Service)
                .map(|d| DestinationKey::new(d.destination_ref, d.destination_port));
            self.caches
                .destinations
                .track_source_proxy(&proxy, &resource.id, keys);
        }
        Ok(vec![proxy.to_id()])
    }

    fn map_implicit_destinations(&self, resource: &Resource, deleted: bool) -> Result<Vec<Id>> {
        let cid = resource.reference();
        if deleted {
            self.caches
                .implicit_destinations
                .untrack_implicit_destinations(&cid);
        } else {
            let decoded = resource.decode::<ComputedImplicitDestinations>()?;
            self.caches.implicit_destinations.track_implicit_destinations(
                &cid,
                decoded
                    .data
                    .destinations
                    .into_iter()
                    .map(|d| d.destination_ref)
                    .filter(|r| r.ty == Type::Service),
            );
        }
        Ok(self.proxies_for_identity(&cid.replace_type(Type::WorkloadIdentity)))
    }

    /// Both the proxies a configuration used to select and the ones it selects
    /// now must be reconciled.
    async fn map_proxy_configuration(
        &self,
        resource: &Resource,
        deleted: bool,
    ) -> Result<Vec<Id>> {
        let proxy_cfg = resource.reference();
        let mut ids = self
            .caches
            .proxy_configurations
            .proxies_for_proxy_configuration(&proxy_cfg);

        if deleted {
            self.caches
                .proxy_configurations
                .untrack_proxy_configuration(&proxy_cfg);
            return Ok(ids);
        }

        let decoded = resource.decode::<ProxyConfiguration>()?;
        let selector = &decoded.data.workloads;

        // Exact names need no store read; prefixes are resolved after.
        let named = self.named_proxies(&proxy_cfg.tenancy, selector);
        self.caches.proxy_configurations.track_proxy_configuration(
            &proxy_cfg,
            named.iter().map(Id::reference),
        );

        let selected = self.selected_proxies(&proxy_cfg.tenancy, selector).await?;
        self.caches.proxy_configurations.track_proxy_configuration(
            &proxy_cfg,
            selected.iter().map(Id::reference),
        );
        ids.extend(selected);
        Ok(ids)
    }

    /// Every proxy that may route to `service`.
    ///
    /// Computed routes may send a service's traffic to other services, so the
    /// dependents of every service whose routes target this one are included
    /// too. Each service is visited once, which makes cycles harmless.
    fn map_service(&self, service: &Reference) -> Vec<Id> {
        let mut ids = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![service.clone()];

        while let Some(service) = pending.pop() {
            if !visited.insert(service.clone()) {
                continue;
            }

            for destination in self.caches.destinations.destinations_by_service(&service) {
                ids.extend(destination.source_proxies.iter().map(Reference::to_id));
            }

            for cid in self
                .caches
                .implicit_destinations
                .implicit_destinations_by_service(&service)
            {
                let identity = cid.reference().replace_type(Type::WorkloadIdentity);
                ids.extend(self.proxies_for_identity(&identity));
            }

            if self.implicit_destinations_fallback {
                ids.extend(self.fallback_proxies(&service.tenancy));
            }

            pending.extend(
                self.caches
                    .computed_routes
                    .computed_routes_by_service(&service)
                    .into_iter()
                    .map(|routes| routes.reference().replace_type(Type::Service)),
            );
        }

        ids
    }

    /// Proxies whose identity has no implicit destinations resource discover
    /// every routable service in their partition.
    fn fallback_proxies(&self, tenancy: &Tenancy) -> Vec<Id> {
        self.caches
            .identities
            .workload_identities()
            .into_iter()
            .filter(|identity| identity.tenancy.partition == tenancy.partition)
            .filter(|identity| !self.caches.implicit_destinations.has_identity(identity))
            .flat_map(|identity| self.proxies_for_identity(&identity))
            .collect()
    }

    fn proxies_for_identity(&self, identity: &Reference) -> Vec<Id> {
        self.caches
            .identities
            .proxy_ids_by_workload_identity(identity)
    }

    fn named_proxies(&self, tenancy: &Tenancy, selector: &WorkloadSelector) -> Vec<Id> {
        selector
            .names
            .iter()
            .map(|name| Id::new(Type::ProxyStateTemplate, tenancy.clone(), name.clone()))
            .collect()
    }

    /// The proxies of the workloads `selector` picks in `tenancy`.
    async fn selected_proxies(
        &self,
        tenancy: &Tenancy,
        selector: &WorkloadSelector,
    ) -> Result<Vec<Id>> {
        let mut ids = self.named_proxies(tenancy, selector);
        for prefix in &selector.prefixes {
            let workloads = self
                .store
                .list(Type::Workload, tenancy, Some(prefix))
                .await?;
            ids.extend(
                workloads
                    .iter()
                    .map(|w| w.id.replace_type(Type::ProxyStateTemplate)),
            );
        }
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl MapResource for Mapper {
    async fn map(&self, resource: &Resource) -> Result<Vec<Request>> {
        self.map_event(resource, false).await
    }

    async fn map_deleted(&self, resource: &Resource) -> Result<Vec<Request>> {
        self.map_event(resource, true).await
    }
}
