//! Gathers and validates every input a proxy's template is built from.
//!
//! Inputs that are missing are treated as not yet converged: the affected
//! destination is omitted and a later change to the missing resource
//! triggers another reconcile. Only store failures and undecodable payloads
//! are returned as errors.

use crate::{
    intermediate::Destination,
    status::{Reason, StatusUpdate},
    Config,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::{
    auth::ComputedTrafficPermissions,
    catalog::{
        Protocol, Service, ServiceEndpoints, Workload, MESH_GATEWAY_NAME, MESH_GATEWAY_PORT,
    },
    mesh::{
        ComputedExplicitDestinations, ComputedImplicitDestinations, ComputedPortRoutes,
        ComputedRoutes, EndpointRef, MeshGatewayMode, ProxyConfiguration,
    },
    Decoded, Error, Id, ProxyStateTemplate, Reference, ResourceData, SharedStore, Tenancy, Type,
    DEFAULT_NAMESPACE, WILDCARD,
};
use mesh_controller_index::{Caches, DestinationKey};
use tracing::debug;

#[derive(Clone)]
pub struct Fetcher {
    store: SharedStore,
    caches: Caches,
    config: Config,
}

/// A service that may become an implicit destination.
struct Candidate {
    service: Reference,
    /// `None` requests every port the routes configure.
    ports: Option<Vec<String>>,
    routes: Option<Decoded<ComputedRoutes>>,
}

type EndpointsMemo = HashMap<Reference, Option<Decoded<ServiceEndpoints>>>;

// === impl Fetcher ===

impl Fetcher {
    pub fn new(store: SharedStore, caches: Caches, config: Config) -> Self {
        Self {
            store,
            caches,
            config,
        }
    }

    /// Reads a workload and tracks its identity. A missing workload's proxy is
    /// forgotten by every cache.
    pub async fn fetch_workload(&self, id: &Id) -> Result<Option<Decoded<Workload>>, Error> {
        let proxy = id.reference().replace_type(Type::ProxyStateTemplate);
        let workload = match self.read::<Workload>(id).await? {
            Some(workload) => workload,
            None => {
                self.caches.untrack_proxy(&proxy);
                return Ok(None);
            }
        };

        if workload.data.identity.is_empty() {
            self.caches.identities.untrack_proxy_id(&proxy);
        } else {
            let identity = Reference::new(
                Type::WorkloadIdentity,
                id.tenancy.clone(),
                workload.data.identity.clone(),
            );
            self.caches.identities.track_pair(&identity, &proxy);
        }
        Ok(Some(workload))
    }

    pub async fn fetch_proxy_state_template(
        &self,
        id: &Id,
    ) -> Result<Option<Decoded<ProxyStateTemplate>>, Error> {
        self.read(id).await
    }

    pub async fn fetch_computed_traffic_permissions(
        &self,
        id: &Id,
    ) -> Result<Option<Decoded<ComputedTrafficPermissions>>, Error> {
        self.read(id).await
    }

    pub async fn fetch_service(&self, id: &Id) -> Result<Option<Decoded<Service>>, Error> {
        self.read(id).await
    }

    pub async fn fetch_service_endpoints(
        &self,
        id: &Id,
    ) -> Result<Option<Decoded<ServiceEndpoints>>, Error> {
        self.read(id).await
    }

    pub async fn fetch_computed_routes(
        &self,
        id: &Id,
    ) -> Result<Option<Decoded<ComputedRoutes>>, Error> {
        assert_eq!(id.ty, Type::ComputedRoutes, "expected computed routes, got {id}");
        let routes = self.read(id).await?;
        if routes.is_none() {
            self.caches
                .computed_routes
                .untrack_computed_routes(&id.reference());
        }
        Ok(routes)
    }

    /// Merges every proxy configuration that selects `proxy` in name order;
    /// fields set by later configurations win.
    pub async fn fetch_and_merge_proxy_configurations(
        &self,
        proxy: &Reference,
    ) -> Result<ProxyConfiguration, Error> {
        let mut merged = ProxyConfiguration::default();
        let workload_name = &proxy.name;
        for id in self
            .caches
            .proxy_configurations
            .proxy_configurations_by_proxy_id(proxy)
        {
            match self.read::<ProxyConfiguration>(&id).await? {
                Some(cfg) if cfg.data.workloads.matches(workload_name) => {
                    merged.merge(&cfg.data)
                }
                Some(_) => debug!(%id, "proxy configuration no longer selects proxy"),
                None => {
                    debug!(%id, "proxy configuration not found");
                    self.caches
                        .proxy_configurations
                        .untrack_proxy_configuration(&id.reference());
                }
            }
        }
        Ok(merged)
    }

    /// The services whose selector matches `workload`. Services that no longer
    /// exist are forgotten.
    pub async fn fetch_selecting_services(
        &self,
        workload: &Reference,
    ) -> Result<Vec<Decoded<Service>>, Error> {
        let mut services = Vec::new();
        for service in self.caches.workload_selection.services_for_workload(workload) {
            match self.fetch_service(&service.to_id()).await? {
                Some(svc) if svc.data.workloads.matches(&workload.name) => services.push(svc),
                Some(_) => {}
                None => self.caches.workload_selection.untrack_service(&service),
            }
        }
        Ok(services)
    }

    /// Resolves the destinations `proxy` declares explicitly, along with the
    /// status to report on the declaring resource.
    pub async fn fetch_explicit_destinations_data(
        &self,
        proxy: &Reference,
        proxy_cfg: &ProxyConfiguration,
    ) -> Result<(Vec<Destination>, Option<StatusUpdate>), Error> {
        let ced_id = proxy.replace_type(Type::ComputedExplicitDestinations).to_id();
        let ced = match self.read::<ComputedExplicitDestinations>(&ced_id).await? {
            Some(ced) => ced,
            None => {
                self.caches.destinations.delete_source_proxy(proxy);
                return Ok((Vec::new(), None));
            }
        };

        // Repair the index in case the watch has not caught up.
        self.caches.destinations.track_source_proxy(
            proxy,
            ced.id(),
            ced.data
                .destinations
                .iter()
                .filter(|d| d.destination_ref.ty == Type::Service)
                .map(|d| {
                    DestinationKey::new(d.destination_ref.clone(), d.destination_port.clone())
                }),
        );

        let mode = proxy_cfg.dynamic_config.mesh_gateway_mode;
        let mut status = StatusUpdate::new(&ced.resource);
        let mut seen = HashSet::new();
        let mut memo = EndpointsMemo::default();
        let mut destinations = Vec::new();

        for dest in &ced.data.destinations {
            let service_ref = &dest.destination_ref;
            let port = dest.destination_port.as_str();
            if service_ref.ty != Type::Service {
                debug!(%service_ref, "ignoring destination that is not a service");
                continue;
            }
            if !seen.insert((service_ref.clone(), port.to_string())) {
                continue;
            }

            if !self.is_local_datacenter(&dest.datacenter) {
                status.push(Reason::DestinationDatacenterNotLocal, service_ref, port);
                continue;
            }

            let service = match self.fetch_service(&service_ref.to_id()).await? {
                Some(service) => service,
                None => {
                    status.push(Reason::ServiceNotFound, service_ref, port);
                    continue;
                }
            };
            if !service.data.is_mesh_enabled() {
                status.push(Reason::MeshProtocolNotFound, service_ref, port);
                continue;
            }
            match service.data.find_port(port) {
                None => {
                    status.push(Reason::ServicePortNotFound, service_ref, port);
                    continue;
                }
                Some(p) if p.protocol == Protocol::Mesh => {
                    status.push(Reason::MeshProtocolDestinationPort, service_ref, port);
                    continue;
                }
                Some(_) => {}
            }

            let routes_id = service_ref.replace_type(Type::ComputedRoutes).to_id();
            let routes = match self.fetch_computed_routes(&routes_id).await? {
                Some(routes) => routes,
                None => {
                    status.push(Reason::ComputedRoutesNotFound, service_ref, port);
                    continue;
                }
            };
            let mut cpr = match routes.data.ported_configs.get(port) {
                Some(cpr) => cpr.clone(),
                None => {
                    status.push(Reason::ComputedRoutesPortNotFound, service_ref, port);
                    continue;
                }
            };
            if cpr.protocol == Protocol::Mesh {
                status.push(Reason::MeshProtocolDestinationPort, service_ref, port);
                continue;
            }
            if !self.targets_are_local(&cpr) {
                status.push(Reason::DestinationDatacenterNotLocal, service_ref, port);
                continue;
            }

            self.resolve_targets(&mut cpr, proxy, mode, &mut memo).await?;
            status.push(Reason::Accepted, service_ref, port);
            destinations.push(Destination {
                explicit: Some(dest.clone()),
                virtual_ips: service.data.virtual_ips.clone(),
                service,
                computed_port_routes: cpr,
            });
        }

        Ok((destinations, Some(status)))
    }

    /// Appends the implicit destinations of `proxy` that are not already
    /// present in `destinations`. Explicit destinations always win.
    pub async fn fetch_implicit_destinations_data(
        &self,
        proxy: &Reference,
        identity: Option<&Reference>,
        proxy_cfg: &ProxyConfiguration,
        mut destinations: Vec<Destination>,
    ) -> Result<Vec<Destination>, Error> {
        let mut seen = destinations
            .iter()
            .map(|d| (d.service_ref(), d.port().to_string()))
            .collect::<HashSet<_>>();
        let mode = proxy_cfg.dynamic_config.mesh_gateway_mode;
        let workload = proxy.replace_type(Type::Workload);
        let mut memo = EndpointsMemo::default();

        for candidate in self.implicit_candidates(proxy, identity).await? {
            let service = match self.fetch_service(&candidate.service.to_id()).await? {
                Some(service) => service,
                None => continue,
            };
            // A proxy never routes to itself implicitly.
            if selects(&service, &workload) {
                continue;
            }
            if !service.data.is_mesh_enabled() {
                continue;
            }

            let routes = match candidate.routes {
                Some(routes) => routes,
                None => {
                    let id = candidate.service.replace_type(Type::ComputedRoutes).to_id();
                    match self.fetch_computed_routes(&id).await? {
                        Some(routes) => routes,
                        None => continue,
                    }
                }
            };

            for (port, cpr) in &routes.data.ported_configs {
                if let Some(ports) = &candidate.ports {
                    if !ports.contains(port) {
                        continue;
                    }
                }
                match service.data.find_port(port) {
                    Some(p) if p.protocol != Protocol::Mesh => {}
                    _ => continue,
                }
                if cpr.protocol == Protocol::Mesh || !self.targets_are_local(cpr) {
                    continue;
                }
                if !seen.insert((candidate.service.clone(), port.clone())) {
                    continue;
                }

                let mut cpr = cpr.clone();
                self.resolve_targets(&mut cpr, proxy, mode, &mut memo).await?;
                destinations.push(Destination {
                    explicit: None,
                    virtual_ips: service.data.virtual_ips.clone(),
                    service: service.clone(),
                    computed_port_routes: cpr,
                });
            }
        }

        Ok(destinations)
    }

    async fn implicit_candidates(
        &self,
        proxy: &Reference,
        identity: Option<&Reference>,
    ) -> Result<Vec<Candidate>, Error> {
        if let Some(identity) = identity {
            let cid_id = identity
                .replace_type(Type::ComputedImplicitDestinations)
                .to_id();
            match self.read::<ComputedImplicitDestinations>(&cid_id).await? {
                Some(cid) => {
                    let destinations = cid
                        .data
                        .destinations
                        .iter()
                        .filter(|d| d.destination_ref.ty == Type::Service)
                        .collect::<Vec<_>>();
                    self.caches
                        .implicit_destinations
                        .track_implicit_destinations(
                            &cid_id.reference(),
                            destinations.iter().map(|d| d.destination_ref.clone()),
                        );
                    return Ok(destinations
                        .into_iter()
                        .map(|d| Candidate {
                            service: d.destination_ref.clone(),
                            ports: if d.destination_ports.is_empty() {
                                None
                            } else {
                                Some(d.destination_ports.clone())
                            },
                            routes: None,
                        })
                        .collect());
                }
                None => self
                    .caches
                    .implicit_destinations
                    .untrack_implicit_destinations(&cid_id.reference()),
            }
        }

        if !self.config.implicit_destinations_fallback {
            return Ok(Vec::new());
        }

        // Without computed implicit destinations, every routable service in
        // the proxy's partition is a candidate.
        let tenancy = Tenancy {
            partition: proxy.tenancy.partition.clone(),
            namespace: WILDCARD.to_string(),
            peer_name: proxy.tenancy.peer_name.clone(),
        };
        let mut candidates = Vec::new();
        for resource in self
            .store
            .list(Type::ComputedRoutes, &tenancy, None)
            .await?
        {
            let routes = resource.decode::<ComputedRoutes>()?;
            candidates.push(Candidate {
                service: resource.reference().replace_type(Type::Service),
                ports: None,
                routes: Some(routes),
            });
        }
        Ok(candidates)
    }

    /// Fills in the endpoint and identity references of every route target.
    async fn resolve_targets(
        &self,
        cpr: &mut ComputedPortRoutes,
        proxy: &Reference,
        mode: MeshGatewayMode,
        memo: &mut EndpointsMemo,
    ) -> Result<(), Error> {
        for target in cpr.targets.values_mut() {
            let backend = target.backend_ref.reference.clone();
            let backend_port = target.backend_ref.port.clone();
            let endpoints_ref = backend.replace_type(Type::ServiceEndpoints);
            let endpoints = match memo.get(&endpoints_ref) {
                Some(endpoints) => endpoints.clone(),
                None => {
                    let endpoints = self
                        .fetch_service_endpoints(&endpoints_ref.to_id())
                        .await?;
                    memo.insert(endpoints_ref, endpoints.clone());
                    endpoints
                }
            };

            target.identity_refs = endpoints
                .as_ref()
                .map(|se| {
                    se.data
                        .identities()
                        .into_iter()
                        .map(|name| {
                            Reference::new(
                                Type::WorkloadIdentity,
                                se.resource.id.tenancy.clone(),
                                name,
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();

            target.service_endpoints_ref = match gateway_partition(proxy, &backend, mode) {
                Some(partition) => Some(EndpointRef {
                    id: Id::new(
                        Type::ServiceEndpoints,
                        Tenancy {
                            partition,
                            namespace: DEFAULT_NAMESPACE.to_string(),
                            peer_name: backend.tenancy.peer_name.clone(),
                        },
                        MESH_GATEWAY_NAME,
                    ),
                    port: MESH_GATEWAY_PORT.to_string(),
                    mesh_port: MESH_GATEWAY_PORT.to_string(),
                }),
                None => endpoints.map(|se| EndpointRef {
                    mesh_port: mesh_port_name(&se.data).unwrap_or_default(),
                    id: se.resource.id,
                    port: backend_port,
                }),
            };
        }
        Ok(())
    }

    fn is_local_datacenter(&self, datacenter: &str) -> bool {
        datacenter.is_empty() || datacenter == self.config.datacenter
    }

    fn targets_are_local(&self, cpr: &ComputedPortRoutes) -> bool {
        cpr.targets
            .values()
            .all(|t| self.is_local_datacenter(&t.backend_ref.datacenter))
    }

    async fn read<T: ResourceData>(&self, id: &Id) -> Result<Option<Decoded<T>>, Error> {
        match self.store.read(id).await {
            Ok(resource) => resource.decode().map(Some),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Gives unspecified workload ports the protocol the selecting services
/// declare for them. Ports that no service declares, or that services
/// disagree on, fall back to TCP.
pub fn inherit_port_protocols(workload: &mut Workload, services: &[Decoded<Service>]) {
    for (name, port) in workload.ports.iter_mut() {
        if port.protocol != Protocol::Unspecified {
            continue;
        }

        let mut protocols = services
            .iter()
            .filter_map(|svc| svc.data.find_port(name))
            .map(|p| p.protocol)
            .filter(|p| *p != Protocol::Unspecified)
            .collect::<Vec<_>>();
        protocols.sort();
        protocols.dedup();

        port.protocol = match protocols.as_slice() {
            [protocol] => *protocol,
            _ => Protocol::Tcp,
        };
    }
}

/// Returns true if `service` selects `workload`.
fn selects(service: &Decoded<Service>, workload: &Reference) -> bool {
    service.resource.id.tenancy == workload.tenancy
        && service.data.workloads.matches(&workload.name)
}

/// The partition whose mesh gateway fronts `backend`, if traffic to it must
/// leave through a gateway.
fn gateway_partition(
    proxy: &Reference,
    backend: &Reference,
    mode: MeshGatewayMode,
) -> Option<String> {
    if backend.tenancy.partition == proxy.tenancy.partition {
        return None;
    }
    match mode {
        MeshGatewayMode::Local => Some(proxy.tenancy.partition.clone()),
        MeshGatewayMode::Remote => Some(backend.tenancy.partition.clone()),
        MeshGatewayMode::None | MeshGatewayMode::Unspecified => None,
    }
}

fn mesh_port_name(endpoints: &ServiceEndpoints) -> Option<String> {
    endpoints
        .endpoints
        .iter()
        .flat_map(|ep| ep.ports.iter())
        .find(|(_, p)| p.protocol == Protocol::Mesh)
        .map(|(name, _)| name.clone())
}
