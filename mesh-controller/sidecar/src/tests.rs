mod mappers;

use crate::{fetcher::Fetcher, Config, Mapper, Reconciler, TrustDomainFetcher};
use maplit::btreemap;
use mesh_controller_core::{
    catalog::{
        Endpoint, Protocol, Service, ServiceEndpoints, ServicePort, Workload, WorkloadAddress,
        WorkloadPort, WorkloadSelector,
    },
    mesh::{
        self, BackendReference, BackendTargetDetails, BackendTargetKind, ComputedBackendRef,
        ComputedGrpcRoute, ComputedGrpcRouteRule, ComputedHttpRoute, ComputedHttpRouteRule,
        ComputedPortRoutes, ComputedRoutes, ComputedTcpRoute, ComputedTcpRouteRule,
        DestinationConfig, ListenAddr, ParentReference, RouteConfig,
    },
    Decoded, Id, MapResource, MemStore, ProxyStateTemplate, Reconcile, Reference, Request,
    Resource, ResourceData, SharedStore, Store, Tenancy, Type,
};
use mesh_controller_index::Caches;
use std::sync::Arc;

const TRUST_DOMAIN: &str = "foo.consul";

struct TestConfig {
    store: Arc<MemStore>,
    caches: Caches,
    mapper: Mapper,
    fetcher: Fetcher,
    reconciler: Reconciler,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === impl TestConfig ===

impl TestConfig {
    fn new(config: Config) -> Self {
        Self::with_trust_domain(
            config,
            Arc::new(|| -> anyhow::Result<String> { Ok(TRUST_DOMAIN.to_string()) }),
        )
    }

    fn with_trust_domain(config: Config, trust_domain: TrustDomainFetcher) -> Self {
        let _tracing = Self::init_tracing();
        let store = MemStore::shared();
        let shared: SharedStore = store.clone();
        let caches = Caches::new();
        Self {
            mapper: Mapper::new(
                shared.clone(),
                caches.clone(),
                config.implicit_destinations_fallback,
            ),
            fetcher: Fetcher::new(shared.clone(), caches.clone(), config.clone()),
            reconciler: Reconciler::new(shared, caches.clone(), config, trust_domain),
            store,
            caches,
            _tracing,
        }
    }

    /// Writes a resource and feeds the change through the mapper, as the
    /// runtime's watch would.
    async fn apply<T: ResourceData>(&self, id: Id, data: &T) -> (Resource, Vec<Request>) {
        self.apply_resource(Resource::new(id, data).expect("resource must encode"))
            .await
    }

    async fn apply_resource(&self, resource: Resource) -> (Resource, Vec<Request>) {
        let written = self.store.write(resource).await.expect("write must succeed");
        let requests = self.mapper.map(&written).await.expect("map must succeed");
        (written, requests)
    }

    async fn remove(&self, id: &Id) -> Vec<Request> {
        let resource = self.store.read(id).await.expect("resource must exist");
        self.store.delete(id).await.expect("delete must succeed");
        self.mapper
            .map_deleted(&resource)
            .await
            .expect("map must succeed")
    }

    async fn reconcile(&self, name: &str) -> anyhow::Result<()> {
        self.reconciler
            .reconcile(Request::new(id(Type::ProxyStateTemplate, name)))
            .await
    }

    async fn template(&self, name: &str) -> Option<Decoded<ProxyStateTemplate>> {
        match self.store.read(&id(Type::ProxyStateTemplate, name)).await {
            Ok(resource) => Some(resource.decode().expect("template must decode")),
            Err(error) if error.is_not_found() => None,
            Err(error) => panic!("failed to read template: {error}"),
        }
    }

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        )
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn id(ty: Type, name: &str) -> Id {
    Id::new(ty, Tenancy::default(), name)
}

fn reference(ty: Type, name: &str) -> Reference {
    Reference::new(ty, Tenancy::default(), name)
}

fn request_names(requests: &[Request]) -> Vec<&str> {
    requests.iter().map(|r| r.id.name.as_str()).collect()
}

fn decoded<T: ResourceData>(id: Id, data: T) -> Decoded<T> {
    Decoded {
        resource: Resource::new(id, &data).expect("resource must encode"),
        data,
    }
}

fn mk_port(port: u32, protocol: Protocol) -> WorkloadPort {
    WorkloadPort { port, protocol }
}

/// A sidecar-enabled workload listening on a TCP, an HTTP and the mesh port.
fn mk_workload(identity: &str) -> Workload {
    Workload {
        addresses: vec![WorkloadAddress {
            host: "10.0.0.1".to_string(),
            ports: Vec::new(),
            external: false,
        }],
        ports: btreemap! {
            "tcp".to_string() => mk_port(8080, Protocol::Tcp),
            "http".to_string() => mk_port(8081, Protocol::Http),
            "mesh".to_string() => mk_port(20000, Protocol::Mesh),
        },
        identity: identity.to_string(),
        node_name: String::new(),
    }
}

fn mk_service_port(target_port: &str, virtual_port: u32, protocol: Protocol) -> ServicePort {
    ServicePort {
        target_port: target_port.to_string(),
        virtual_port,
        protocol,
    }
}

/// A mesh-enabled service exposing `tcp`, `http` and the mesh port.
fn mk_service(workloads: &[&str], virtual_ip: &str) -> Service {
    Service {
        workloads: WorkloadSelector {
            names: workloads.iter().map(|n| n.to_string()).collect(),
            prefixes: Vec::new(),
        },
        ports: vec![
            mk_service_port("tcp", 7070, Protocol::Tcp),
            mk_service_port("http", 8080, Protocol::Http),
            mk_service_port("mesh", 0, Protocol::Mesh),
        ],
        virtual_ips: vec![virtual_ip.to_string()],
    }
}

fn mk_endpoints(identities: &[&str]) -> ServiceEndpoints {
    ServiceEndpoints {
        endpoints: identities
            .iter()
            .enumerate()
            .map(|(i, identity)| Endpoint {
                target_ref: None,
                addresses: vec![WorkloadAddress {
                    host: format!("10.0.1.{}", i + 1),
                    ports: Vec::new(),
                    external: false,
                }],
                ports: btreemap! {
                    "tcp".to_string() => mk_port(8080, Protocol::Tcp),
                    "http".to_string() => mk_port(8081, Protocol::Http),
                    "mesh".to_string() => mk_port(20000, Protocol::Mesh),
                },
                identity: identity.to_string(),
            })
            .collect(),
    }
}

fn backend_target(service: &Reference, port: &str) -> String {
    format!("{}/{}?port={port}", service.tenancy, service.name)
}

fn mk_target(service: &Reference, port: &str) -> BackendTargetDetails {
    BackendTargetDetails {
        kind: BackendTargetKind::Direct,
        backend_ref: BackendReference {
            reference: service.clone(),
            port: port.to_string(),
            datacenter: String::new(),
        },
        failover_config: None,
        destination_config: DestinationConfig::default(),
        service_endpoints_ref: None,
        identity_refs: Vec::new(),
    }
}

/// Routes that send all of a port's traffic to the same port of `backend`.
fn mk_port_routes(
    parent: &Reference,
    port: &str,
    protocol: Protocol,
    backend: &Reference,
) -> ComputedPortRoutes {
    let target = backend_target(backend, port);
    let backend_refs = vec![ComputedBackendRef {
        backend_target: target.clone(),
        weight: 1,
    }];
    let config = match protocol {
        Protocol::Http | Protocol::Http2 => RouteConfig::Http(ComputedHttpRoute {
            rules: vec![ComputedHttpRouteRule {
                backend_refs,
                ..Default::default()
            }],
        }),
        Protocol::Grpc => RouteConfig::Grpc(ComputedGrpcRoute {
            rules: vec![ComputedGrpcRouteRule {
                backend_refs,
                ..Default::default()
            }],
        }),
        _ => RouteConfig::Tcp(ComputedTcpRoute {
            rules: vec![ComputedTcpRouteRule { backend_refs }],
        }),
    };
    ComputedPortRoutes {
        config,
        parent_ref: ParentReference {
            reference: parent.clone(),
            port: port.to_string(),
        },
        protocol,
        targets: btreemap! { target => mk_target(backend, port) },
        using_default_config: true,
    }
}

/// The default routes of a service: every port routes to itself.
fn mk_computed_routes(service: &Reference, ports: &[(&str, Protocol)]) -> ComputedRoutes {
    ComputedRoutes {
        ported_configs: ports
            .iter()
            .map(|(port, protocol)| {
                (
                    port.to_string(),
                    mk_port_routes(service, port, *protocol, service),
                )
            })
            .collect(),
        bound_references: Vec::new(),
    }
}

fn mk_destination(service: &Reference, port: &str, listen_port: u32) -> mesh::Destination {
    mesh::Destination {
        destination_ref: service.clone(),
        destination_port: port.to_string(),
        datacenter: String::new(),
        listen_addr: ListenAddr::IpPort {
            ip: "127.0.0.1".to_string(),
            port: listen_port,
        },
    }
}
