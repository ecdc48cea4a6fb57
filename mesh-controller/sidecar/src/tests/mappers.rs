use super::*;
use mesh_controller_core::{
    auth::ComputedTrafficPermissions,
    mesh::{
        ComputedExplicitDestinations, ComputedImplicitDestinations, ImplicitDestination,
        ProxyConfiguration,
    },
    Error, Status, WatchStream,
};
use pretty_assertions::assert_eq;

fn explicit_destinations(services: &[&str]) -> ComputedExplicitDestinations {
    ComputedExplicitDestinations {
        destinations: services
            .iter()
            .enumerate()
            .map(|(i, name)| {
                mk_destination(&reference(Type::Service, name), "tcp", 1000 + i as u32)
            })
            .collect(),
    }
}

fn without_fallback() -> TestConfig {
    TestConfig::new(Config {
        implicit_destinations_fallback: false,
        ..Default::default()
    })
}

#[tokio::test(flavor = "current_thread")]
async fn workload_maps_to_its_template() {
    let test = without_fallback();
    let (_, requests) = test
        .apply(id(Type::Workload, "web"), &mk_workload("web-identity"))
        .await;
    assert_eq!(requests, vec![Request::new(id(Type::ProxyStateTemplate, "web"))]);
    assert_eq!(
        test.caches
            .identities
            .workload_identity_for_proxy(&reference(Type::ProxyStateTemplate, "web")),
        Some(reference(Type::WorkloadIdentity, "web-identity"))
    );

    // Dropping the identity untracks it.
    test.apply(id(Type::Workload, "web"), &mk_workload("")).await;
    assert_eq!(
        test.caches
            .identities
            .workload_identity_for_proxy(&reference(Type::ProxyStateTemplate, "web")),
        None
    );
}

#[tokio::test(flavor = "current_thread")]
async fn deleted_workload_is_forgotten() {
    let test = without_fallback();
    test.apply(id(Type::Workload, "web"), &mk_workload("web-identity"))
        .await;
    test.apply(
        id(Type::ComputedExplicitDestinations, "web"),
        &explicit_destinations(&["api"]),
    )
    .await;

    let requests = test.remove(&id(Type::Workload, "web")).await;
    assert_eq!(request_names(&requests), vec!["web"]);

    let proxy = reference(Type::ProxyStateTemplate, "web");
    assert_eq!(test.caches.identities.workload_identity_for_proxy(&proxy), None);
    assert!(test
        .caches
        .destinations
        .destinations_by_source_proxy(&proxy)
        .is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn service_maps_to_dependents_and_selected_proxies() {
    let test = without_fallback();
    test.apply(id(Type::Workload, "api-2"), &mk_workload("api-identity"))
        .await;
    test.apply(id(Type::Workload, "db-1"), &mk_workload("db-identity"))
        .await;
    test.apply(
        id(Type::ComputedExplicitDestinations, "web"),
        &explicit_destinations(&["api"]),
    )
    .await;

    let mut api = mk_service(&["api-1"], "10.96.0.1");
    api.workloads.prefixes = vec!["api-".to_string()];
    let (_, requests) = test.apply(id(Type::Service, "api"), &api).await;
    assert_eq!(request_names(&requests), vec!["api-1", "api-2", "web"]);

    // Both the old and the new selection are affected by a selector change.
    let api = mk_service(&["db-1"], "10.96.0.1");
    let (_, requests) = test.apply(id(Type::Service, "api"), &api).await;
    assert_eq!(
        request_names(&requests),
        vec!["api-1", "api-2", "db-1", "web"]
    );

    let requests = test.remove(&id(Type::Service, "api")).await;
    assert_eq!(request_names(&requests), vec!["db-1", "web"]);
    assert_eq!(
        test.caches
            .workload_selection
            .selector(&reference(Type::Service, "api")),
        None
    );
}

#[tokio::test(flavor = "current_thread")]
async fn service_endpoints_map_to_dependents() {
    let test = without_fallback();
    test.apply(
        id(Type::ComputedExplicitDestinations, "web"),
        &explicit_destinations(&["api"]),
    )
    .await;
    test.apply(
        id(Type::ComputedExplicitDestinations, "db"),
        &explicit_destinations(&["api", "cache"]),
    )
    .await;

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "api"), &mk_endpoints(&["api"]))
        .await;
    assert_eq!(request_names(&requests), vec!["db", "web"]);

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "cache"), &mk_endpoints(&["cache"]))
        .await;
    assert_eq!(request_names(&requests), vec!["db"]);

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "other"), &mk_endpoints(&["other"]))
        .await;
    assert!(requests.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn backend_changes_reach_proxies_through_computed_routes() {
    let test = without_fallback();
    test.apply(
        id(Type::ComputedExplicitDestinations, "web"),
        &explicit_destinations(&["api"]),
    )
    .await;

    // api splits its traffic to api-v2, which in turn routes back to api.
    let api = reference(Type::Service, "api");
    let api_v2 = reference(Type::Service, "api-v2");
    let (_, requests) = test
        .apply(
            id(Type::ComputedRoutes, "api"),
            &ComputedRoutes {
                ported_configs: btreemap! {
                    "tcp".to_string() => mk_port_routes(&api, "tcp", Protocol::Tcp, &api_v2),
                },
                bound_references: Vec::new(),
            },
        )
        .await;
    assert_eq!(request_names(&requests), vec!["web"]);
    test.apply(
        id(Type::ComputedRoutes, "api-v2"),
        &ComputedRoutes {
            ported_configs: btreemap! {
                "tcp".to_string() => mk_port_routes(&api_v2, "tcp", Protocol::Tcp, &api),
            },
            bound_references: Vec::new(),
        },
    )
    .await;

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "api-v2"), &mk_endpoints(&["v2"]))
        .await;
    assert_eq!(request_names(&requests), vec!["web"]);

    // Once api no longer routes to api-v2, its changes stop reaching web.
    test.remove(&id(Type::ComputedRoutes, "api")).await;
    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "api-v2"), &mk_endpoints(&["v2"]))
        .await;
    assert!(requests.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn implicit_destinations_map_to_identity_proxies() {
    let test = without_fallback();
    test.apply(id(Type::Workload, "web-1"), &mk_workload("web-identity"))
        .await;
    test.apply(id(Type::Workload, "web-2"), &mk_workload("web-identity"))
        .await;
    test.apply(id(Type::Workload, "db-1"), &mk_workload("db-identity"))
        .await;

    let (_, requests) = test
        .apply(
            id(Type::ComputedImplicitDestinations, "web-identity"),
            &ComputedImplicitDestinations {
                destinations: vec![ImplicitDestination {
                    destination_ref: reference(Type::Service, "api"),
                    destination_ports: Vec::new(),
                }],
            },
        )
        .await;
    assert_eq!(request_names(&requests), vec!["web-1", "web-2"]);

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "api"), &mk_endpoints(&["api"]))
        .await;
    assert_eq!(request_names(&requests), vec!["web-1", "web-2"]);

    let (_, requests) = test
        .apply(
            id(Type::ComputedTrafficPermissions, "db-identity"),
            &ComputedTrafficPermissions::default(),
        )
        .await;
    assert_eq!(request_names(&requests), vec!["db-1"]);
}

#[tokio::test(flavor = "current_thread")]
async fn fallback_maps_to_identities_without_implicit_destinations() {
    let test = TestConfig::default();
    test.apply(id(Type::Workload, "web-1"), &mk_workload("web-identity"))
        .await;
    test.apply(id(Type::Workload, "db-1"), &mk_workload("db-identity"))
        .await;
    test.apply(
        Id::new(Type::Workload, Tenancy::new("ap2", "default"), "other-1"),
        &mk_workload("other-identity"),
    )
    .await;
    // db's identity discovers its destinations explicitly.
    test.apply(
        id(Type::ComputedImplicitDestinations, "db-identity"),
        &ComputedImplicitDestinations::default(),
    )
    .await;

    let (_, requests) = test
        .apply(id(Type::ServiceEndpoints, "api"), &mk_endpoints(&["api"]))
        .await;
    assert_eq!(request_names(&requests), vec!["web-1"]);
}

#[tokio::test(flavor = "current_thread")]
async fn proxy_configuration_maps_old_and_new_selection() {
    let test = without_fallback();
    test.apply(id(Type::Workload, "web-1"), &mk_workload("web-identity"))
        .await;
    test.apply(id(Type::Workload, "web-2"), &mk_workload("web-identity"))
        .await;

    let mut cfg = ProxyConfiguration::default();
    cfg.workloads.prefixes = vec!["web-".to_string()];
    let (_, requests) = test.apply(id(Type::ProxyConfiguration, "cfg"), &cfg).await;
    assert_eq!(request_names(&requests), vec!["web-1", "web-2"]);

    cfg.workloads.prefixes.clear();
    cfg.workloads.names = vec!["db-1".to_string()];
    let (_, requests) = test.apply(id(Type::ProxyConfiguration, "cfg"), &cfg).await;
    assert_eq!(request_names(&requests), vec!["db-1", "web-1", "web-2"]);

    let requests = test.remove(&id(Type::ProxyConfiguration, "cfg")).await;
    assert_eq!(request_names(&requests), vec!["db-1"]);
    assert!(test
        .caches
        .proxy_configurations
        .proxy_configurations_by_proxy_id(&reference(Type::ProxyStateTemplate, "db-1"))
        .is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn explicit_destinations_map_to_their_proxy() {
    let test = without_fallback();
    let (_, requests) = test
        .apply(
            id(Type::ComputedExplicitDestinations, "web"),
            &explicit_destinations(&["api", "db"]),
        )
        .await;
    assert_eq!(request_names(&requests), vec!["web"]);
    assert_eq!(
        test.caches
            .destinations
            .destinations_by_source_proxy(&reference(Type::ProxyStateTemplate, "web"))
            .len(),
        2
    );

    let requests = test
        .remove(&id(Type::ComputedExplicitDestinations, "web"))
        .await;
    assert_eq!(request_names(&requests), vec!["web"]);
    assert!(test
        .caches
        .destinations
        .destinations_by_service(&reference(Type::Service, "api"))
        .is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn templates_map_to_themselves() {
    let test = without_fallback();
    let (_, requests) = test
        .apply(
            id(Type::ProxyStateTemplate, "web"),
            &mesh_controller_core::ProxyStateTemplate::default(),
        )
        .await;
    assert_eq!(requests, vec![Request::new(id(Type::ProxyStateTemplate, "web"))]);
}

/// Fails every list, as a briefly unreachable store would.
struct Unlistable(Arc<MemStore>);

#[async_trait::async_trait]
impl Store for Unlistable {
    async fn read(&self, id: &Id) -> Result<Resource, Error> {
        self.0.read(id).await
    }

    async fn write(&self, resource: Resource) -> Result<Resource, Error> {
        self.0.write(resource).await
    }

    async fn delete(&self, id: &Id) -> Result<(), Error> {
        self.0.delete(id).await
    }

    async fn list(
        &self,
        _ty: Type,
        _tenancy: &Tenancy,
        _name_prefix: Option<&str>,
    ) -> Result<Vec<Resource>, Error> {
        Err(Error::Unavailable("store is unreachable".to_string()))
    }

    async fn write_status(&self, id: &Id, key: &str, status: Status) -> Result<Resource, Error> {
        self.0.write_status(id, key, status).await
    }

    fn watch(&self, ty: Type) -> WatchStream {
        self.0.watch(ty)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn caches_are_updated_before_failed_store_reads() {
    let test = without_fallback();
    let mapper = Mapper::new(
        Arc::new(Unlistable(test.store.clone())),
        test.caches.clone(),
        false,
    );

    let mut service = mk_service(&["api-1"], "10.96.0.1");
    service.workloads.prefixes = vec!["api-".to_string()];
    let service = test
        .store
        .write(Resource::new(id(Type::Service, "api"), &service).expect("service must encode"))
        .await
        .expect("write must succeed");
    assert!(mapper.map(&service).await.is_err(), "listing must fail");
    assert_eq!(
        test.caches
            .workload_selection
            .selector(&service.reference()),
        Some(WorkloadSelector {
            names: vec!["api-1".to_string()],
            prefixes: vec!["api-".to_string()],
        })
    );

    let mut cfg = ProxyConfiguration::default();
    cfg.workloads.names = vec!["web-1".to_string()];
    cfg.workloads.prefixes = vec!["web-".to_string()];
    let cfg = test
        .store
        .write(Resource::new(id(Type::ProxyConfiguration, "cfg"), &cfg).expect("cfg must encode"))
        .await
        .expect("write must succeed");
    assert!(mapper.map(&cfg).await.is_err(), "listing must fail");
    let tracked = test
        .caches
        .proxy_configurations
        .proxy_configurations_by_proxy_id(&reference(Type::ProxyStateTemplate, "web-1"));
    assert_eq!(
        tracked.iter().map(|id| id.name.as_str()).collect::<Vec<_>>(),
        vec!["cfg"]
    );
}
