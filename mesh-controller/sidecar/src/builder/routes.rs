use super::{naming, Builder};
use mesh_controller_core::{
    mesh::{
        BackendTargetDetails, ComputedBackendRef, ComputedGrpcRoute, ComputedHttpRoute,
        GrpcRouteMatch, HttpRouteMatch, PathMatch, NULL_ROUTE_BACKEND,
    },
    proxy_state::{ClusterTarget, RouteDestination, RouteMatch, RouteRule, WeightedCluster},
};
use std::collections::BTreeMap;
use tracing::debug;

pub(super) type Targets = BTreeMap<String, BackendTargetDetails>;

// === impl Builder ===

impl Builder {
    /// The name of the cluster that serves `details`.
    pub(super) fn target_cluster_name(&self, details: &BackendTargetDetails) -> String {
        let backend = &details.backend_ref;
        let datacenter = if backend.datacenter.is_empty() {
            &self.local_datacenter
        } else {
            &backend.datacenter
        };
        let sni = naming::destination_sni(&backend.reference, datacenter, &self.trust_domain);
        naming::cluster_name(&backend.port, &sni)
    }

    /// Resolves backend refs to a cluster target. Refs to unknown targets are
    /// skipped; `None` is returned when none remain.
    pub(super) fn cluster_target(
        &self,
        backend_refs: &[ComputedBackendRef],
        targets: &Targets,
    ) -> Option<ClusterTarget> {
        let mut clusters = backend_refs
            .iter()
            .filter_map(|backend| {
                let name = if backend.backend_target == NULL_ROUTE_BACKEND {
                    naming::NULL_ROUTE_CLUSTER_NAME.to_string()
                } else {
                    match targets.get(&backend.backend_target) {
                        Some(details) => self.target_cluster_name(details),
                        None => {
                            debug!(
                                target = %backend.backend_target,
                                "skipping unknown backend target"
                            );
                            return None;
                        }
                    }
                };
                Some(WeightedCluster {
                    name,
                    weight: backend.weight,
                })
            })
            .collect::<Vec<_>>();

        match clusters.len() {
            0 => None,
            1 => Some(ClusterTarget::cluster(clusters.remove(0).name)),
            _ => Some(ClusterTarget::WeightedClusters(clusters)),
        }
    }

    /// Expands every rule into one route rule per match. A rule without
    /// matches matches every request.
    pub(super) fn http_route_rules(
        &self,
        route: &ComputedHttpRoute,
        targets: &Targets,
    ) -> Vec<RouteRule> {
        let mut rules = Vec::new();
        for rule in &route.rules {
            let target = match self.cluster_target(&rule.backend_refs, targets) {
                Some(target) => target,
                None => continue,
            };
            let destination = RouteDestination {
                target,
                timeouts: rule.timeouts.clone(),
                retries: rule.retries.clone(),
            };

            if rule.matches.is_empty() {
                rules.push(RouteRule {
                    r#match: http_route_match(&HttpRouteMatch::default()),
                    destination,
                });
                continue;
            }
            rules.extend(rule.matches.iter().map(|m| RouteRule {
                r#match: http_route_match(m),
                destination: destination.clone(),
            }));
        }
        rules
    }

    pub(super) fn grpc_route_rules(
        &self,
        route: &ComputedGrpcRoute,
        targets: &Targets,
    ) -> Vec<RouteRule> {
        let mut rules = Vec::new();
        for rule in &route.rules {
            let target = match self.cluster_target(&rule.backend_refs, targets) {
                Some(target) => target,
                None => continue,
            };
            let destination = RouteDestination {
                target,
                timeouts: rule.timeouts.clone(),
                retries: rule.retries.clone(),
            };

            if rule.matches.is_empty() {
                rules.push(RouteRule {
                    r#match: RouteMatch::default(),
                    destination,
                });
                continue;
            }
            rules.extend(rule.matches.iter().map(|m| RouteRule {
                r#match: grpc_route_match(m),
                destination: destination.clone(),
            }));
        }
        rules
    }
}

/// Requests without a path match fall back to matching every path.
fn http_route_match(m: &HttpRouteMatch) -> RouteMatch {
    RouteMatch {
        path: Some(
            m.path
                .clone()
                .unwrap_or_else(|| PathMatch::Prefix("/".to_string())),
        ),
        headers: m.headers.clone(),
        methods: m.method.iter().cloned().collect(),
    }
}

/// gRPC methods are served at `/<service>/<method>`.
fn grpc_route_match(m: &GrpcRouteMatch) -> RouteMatch {
    let path = match (m.service.as_deref(), m.method.as_deref()) {
        (None, None) => None,
        (Some(service), None) => Some(PathMatch::Prefix(format!("/{service}/"))),
        (None, Some(method)) => Some(PathMatch::Regex(format!("/[^/]+/{method}"))),
        (Some(service), Some(method)) => Some(PathMatch::Exact(format!("/{service}/{method}"))),
    };
    RouteMatch {
        path,
        headers: m.headers.clone(),
        methods: Vec::new(),
    }
}
