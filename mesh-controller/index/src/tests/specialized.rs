use super::*;
use crate::{Caches, DestinationKey};
use pretty_assertions::assert_eq;

#[test]
fn identities_track_one_identity_per_proxy() {
    let caches = Caches::new();
    let identity = |n: &str| mk_ref(Type::WorkloadIdentity, n);

    caches.identities.track_pair(&identity("api"), &proxy("api-1"));
    caches.identities.track_pair(&identity("api"), &proxy("api-2"));
    assert_eq!(
        caches.identities.proxy_ids_by_workload_identity(&identity("api")),
        vec![mk_id(Type::ProxyStateTemplate, "api-1"), mk_id(Type::ProxyStateTemplate, "api-2")]
    );

    // A proxy whose identity changes moves to the new identity.
    caches.identities.track_pair(&identity("api-v2"), &proxy("api-2"));
    assert_eq!(
        caches.identities.proxy_ids_by_workload_identity(&identity("api")),
        vec![mk_id(Type::ProxyStateTemplate, "api-1")]
    );
    assert_eq!(
        caches.identities.workload_identity_for_proxy(&proxy("api-2")),
        Some(identity("api-v2"))
    );
    assert_eq!(
        caches.identities.workload_identities(),
        vec![identity("api"), identity("api-v2")]
    );
    assert!(caches.identities.is_consistent());
}

#[test]
fn proxy_configurations_are_tracked_per_proxy() {
    let caches = Caches::new();
    let cfg = |n: &str| mk_ref(Type::ProxyConfiguration, n);

    caches
        .proxy_configurations
        .track_proxy_configuration(&cfg("b-cfg"), vec![proxy("web"), proxy("api")]);
    caches
        .proxy_configurations
        .track_proxy_configuration(&cfg("a-cfg"), vec![proxy("web")]);

    assert_eq!(
        caches.proxy_configurations.proxy_configurations_by_proxy_id(&proxy("web")),
        vec![mk_id(Type::ProxyConfiguration, "a-cfg"), mk_id(Type::ProxyConfiguration, "b-cfg")]
    );

    caches.proxy_configurations.untrack_proxy_id(&proxy("web"));
    assert!(caches
        .proxy_configurations
        .proxy_configurations_by_proxy_id(&proxy("web"))
        .is_empty());
    assert_eq!(
        caches.proxy_configurations.proxies_for_proxy_configuration(&cfg("b-cfg")),
        vec![mk_id(Type::ProxyStateTemplate, "api")]
    );
    assert!(caches.proxy_configurations.is_consistent());
}

#[test]
fn computed_routes_by_backend_service() {
    let caches = Caches::new();
    let routes = mk_ref(Type::ComputedRoutes, "api");
    caches
        .computed_routes
        .track_computed_routes(&routes, vec![svc("api"), svc("api-backup")]);

    assert_eq!(
        caches.computed_routes.computed_routes_by_service(&svc("api-backup")),
        vec![mk_id(Type::ComputedRoutes, "api")]
    );
    caches.computed_routes.untrack_computed_routes(&routes);
    assert!(caches.computed_routes.is_empty());
    assert!(caches.computed_routes.is_consistent());
}

#[test]
fn implicit_destinations_by_identity() {
    let caches = Caches::new();
    let cid = mk_ref(Type::ComputedImplicitDestinations, "web");
    caches
        .implicit_destinations
        .track_implicit_destinations(&cid, vec![svc("api")]);

    assert!(caches
        .implicit_destinations
        .has_identity(&mk_ref(Type::WorkloadIdentity, "web")));
    assert!(!caches
        .implicit_destinations
        .has_identity(&mk_ref(Type::WorkloadIdentity, "api")));
    assert_eq!(
        caches.implicit_destinations.implicit_destinations_by_service(&svc("api")),
        vec![mk_id(Type::ComputedImplicitDestinations, "web")]
    );
}

#[test]
fn untrack_proxy_clears_every_cache() {
    let caches = Caches::new();
    let web = proxy("web");
    caches.identities.track_pair(&mk_ref(Type::WorkloadIdentity, "web"), &web);
    caches.proxy_configurations.track_proxy_configuration(
        &mk_ref(Type::ProxyConfiguration, "cfg"),
        vec![web.clone()],
    );
    caches.destinations.track_source_proxy(
        &web,
        &mk_id(Type::ComputedExplicitDestinations, "web"),
        vec![DestinationKey::new(svc("api"), "tcp")],
    );

    caches.untrack_proxy(&web);

    assert!(caches.identities.is_empty());
    assert!(caches.destinations.is_empty());
    assert!(caches
        .proxy_configurations
        .proxy_configurations_by_proxy_id(&web)
        .is_empty());
}
