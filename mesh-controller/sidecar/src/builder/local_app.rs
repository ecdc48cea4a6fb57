use super::{naming, Builder};
use mesh_controller_core::{
    auth::{ComputedTrafficPermissions, DestinationRule, Permission, Source},
    catalog::{Protocol, Workload},
    mesh::{self, ExposePath, ExposePathProtocol, PathMatch},
    proxy_state::{
        BalanceConnections, BindAddress, Cluster, ClusterGroup, ClusterTarget, ConnectionTls,
        Direction, EndpointGroup, EndpointGroupKind, L4Destination, L7Destination, L7Protocol,
        LeafCertificateRef, Listener, Match, Principal, ProxyPermission, Route, RouteDestination,
        RouteMatch, RouteRule, Router, RouterDestination, StaticEndpoint, TrafficPermissions,
        TransportSocket, TrustBundleRef, VirtualHost,
    },
    DEFAULT_NAMESPACE, DEFAULT_PARTITION,
};

const LOCAL_HOST: &str = "127.0.0.1";
const ANY_HOST: &str = "0.0.0.0";
const DEFAULT_LOCAL_CONNECT_TIMEOUT_MS: u64 = 5_000;
const ANY_SEGMENT: &str = "[^/]+";

// === impl Builder ===

impl Builder {
    /// Adds the inbound side of the proxy: the public listener that accepts
    /// mesh traffic for each of the workload's ports and the clusters that
    /// forward it to the local application.
    pub fn build_local_app(
        mut self,
        workload: &Workload,
        ctp: Option<&ComputedTrafficPermissions>,
    ) -> Self {
        self.template.proxy_state.traffic_permission_default_allow =
            self.default_allow && ctp.map_or(false, |ctp| ctp.is_default);

        let (mesh_name, mesh_port) = match workload.mesh_port() {
            Some(mesh) => mesh,
            None => return self,
        };

        let host = workload
            .addresses
            .iter()
            .find(|a| !a.external && a.binds_port(mesh_name))
            .map(|a| a.host.as_str())
            .unwrap_or(ANY_HOST);
        let mut listener = Listener {
            name: naming::PUBLIC_LISTENER_NAME.to_string(),
            direction: Direction::Inbound,
            bind_address: BindAddress::HostPort {
                host: host.to_string(),
                port: mesh_port.port,
            },
            routers: Vec::new(),
            default_router: None,
            capabilities: Vec::new(),
            balance_connections: None,
        };

        let inbound = self.proxy_cfg.dynamic_config.inbound_connections.clone();
        let max_inbound_connections = inbound
            .as_ref()
            .map(|c| c.max_inbound_connections)
            .unwrap_or_default();
        if inbound.map_or(false, |c| {
            c.balance_inbound_connections == mesh::BalanceConnections::Exact
        }) {
            listener.balance_connections = Some(BalanceConnections::Exact);
        }

        for (name, port) in &workload.ports {
            if port.protocol == Protocol::Mesh {
                continue;
            }

            let connection = self
                .proxy_cfg
                .dynamic_config
                .local_connection
                .get(name)
                .cloned()
                .unwrap_or_default();
            let cluster_name = naming::local_app_cluster_name(name);
            let permissions = ctp.map(|ctp| self.traffic_permissions(ctp, name));

            let destination = match L7Protocol::from_protocol(port.protocol) {
                Some(protocol) => {
                    let route_name = naming::local_app_route_name(name);
                    self.add_route(
                        route_name.clone(),
                        RouteRule {
                            r#match: RouteMatch {
                                path: Some(PathMatch::Prefix("/".to_string())),
                                ..Default::default()
                            },
                            destination: RouteDestination {
                                target: ClusterTarget::cluster(cluster_name.clone()),
                                timeouts: connection.request_timeout_ms.map(|ms| {
                                    mesh::RouteTimeouts {
                                        request_ms: Some(ms),
                                        idle_ms: None,
                                    }
                                }),
                                retries: None,
                            },
                        },
                    );
                    RouterDestination::L7(L7Destination {
                        route_name,
                        stat_prefix: naming::PUBLIC_LISTENER_NAME.to_string(),
                        protocol,
                        static_route: true,
                        traffic_permissions: permissions,
                        max_inbound_connections,
                    })
                }
                None => RouterDestination::L4(L4Destination {
                    target: ClusterTarget::cluster(cluster_name.clone()),
                    stat_prefix: naming::PUBLIC_LISTENER_NAME.to_string(),
                    traffic_permissions: permissions,
                    max_inbound_connections,
                }),
            };

            listener.routers.push(Router {
                r#match: Some(Match {
                    alpn_protocols: vec![naming::alpn_protocol(name)],
                    ..Default::default()
                }),
                destination,
                inbound_tls: Some(TransportSocket {
                    connection_tls: ConnectionTls::InboundMesh {
                        identity_key: self.identity_key(),
                        trust_bundle_peer_name_keys: vec![naming::LOCAL_PEER_KEY.to_string()],
                    },
                    alpn_protocols: vec![naming::alpn_protocol(name)],
                }),
            });

            self.add_static_cluster(
                cluster_name,
                port.port,
                connection
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_LOCAL_CONNECT_TIMEOUT_MS),
                if port.protocol == Protocol::Unspecified {
                    Protocol::Tcp
                } else {
                    port.protocol
                },
            );
        }
        self.template.proxy_state.listeners.push(listener);

        let expose_paths = self
            .proxy_cfg
            .dynamic_config
            .expose_config
            .as_ref()
            .map(|c| c.expose_paths.clone())
            .unwrap_or_default();
        for path in &expose_paths {
            self.add_exposed_path(path);
        }

        self.add_inbound_requirements();
        self
    }

    /// Exposed paths bypass mTLS so that non-mesh clients such as health
    /// checkers can reach them.
    fn add_exposed_path(&mut self, path: &ExposePath) {
        let cluster_name = naming::exposed_cluster_name(path.local_path_port);
        let route_name = naming::exposed_path_route_name(path.listener_port, &path.path);
        let protocol = match path.protocol {
            ExposePathProtocol::Http => L7Protocol::Http,
            ExposePathProtocol::Http2 => L7Protocol::Http2,
        };

        self.template.proxy_state.listeners.push(Listener {
            name: naming::exposed_path_listener_name(path.listener_port),
            direction: Direction::Inbound,
            bind_address: BindAddress::HostPort {
                host: ANY_HOST.to_string(),
                port: path.listener_port,
            },
            routers: vec![Router {
                r#match: None,
                destination: RouterDestination::L7(L7Destination {
                    route_name: route_name.clone(),
                    stat_prefix: route_name.clone(),
                    protocol,
                    static_route: true,
                    traffic_permissions: None,
                    max_inbound_connections: 0,
                }),
                inbound_tls: None,
            }],
            default_router: None,
            capabilities: Vec::new(),
            balance_connections: None,
        });

        self.add_route(
            route_name,
            RouteRule {
                r#match: RouteMatch {
                    path: Some(PathMatch::Exact(path.path.clone())),
                    ..Default::default()
                },
                destination: RouteDestination {
                    target: ClusterTarget::cluster(cluster_name.clone()),
                    timeouts: None,
                    retries: None,
                },
            },
        );

        let cluster_protocol = match path.protocol {
            ExposePathProtocol::Http => Protocol::Http,
            ExposePathProtocol::Http2 => Protocol::Http2,
        };
        self.add_static_cluster(
            cluster_name,
            path.local_path_port,
            DEFAULT_LOCAL_CONNECT_TIMEOUT_MS,
            cluster_protocol,
        );
    }

    fn add_inbound_requirements(&mut self) {
        if let Some(identity) = self.identity().cloned() {
            self.template.required_leaf_certificates.insert(
                identity.name.clone(),
                LeafCertificateRef {
                    name: identity.name,
                    namespace: identity.tenancy.namespace,
                    partition: identity.tenancy.partition,
                },
            );
        }
        self.template.required_trust_bundles.insert(
            naming::LOCAL_PEER_KEY.to_string(),
            TrustBundleRef {
                peer: naming::LOCAL_PEER_KEY.to_string(),
                trust_domain: self.trust_domain.clone(),
            },
        );
    }

    fn add_route(&mut self, name: String, rule: RouteRule) {
        let route = Route {
            virtual_hosts: vec![VirtualHost {
                name: name.clone(),
                domains: vec!["*".to_string()],
                route_rules: vec![rule],
            }],
        };
        self.template.proxy_state.routes.insert(name, route);
    }

    fn add_static_cluster(
        &mut self,
        name: String,
        port: u32,
        connect_timeout_ms: u64,
        protocol: Protocol,
    ) {
        let cluster = Cluster {
            name: name.clone(),
            alt_stat_name: String::new(),
            group: ClusterGroup::EndpointGroup(EndpointGroup {
                name: String::new(),
                kind: EndpointGroupKind::Static {
                    connect_timeout_ms,
                    endpoints: vec![StaticEndpoint {
                        host: LOCAL_HOST.to_string(),
                        port,
                    }],
                },
            }),
            protocol,
        };
        self.template.proxy_state.clusters.insert(name, cluster);
    }

    /// The traffic permissions that apply to the workload port `port`.
    fn traffic_permissions(
        &self,
        ctp: &ComputedTrafficPermissions,
        port: &str,
    ) -> TrafficPermissions {
        let convert = |permissions: &[Permission]| {
            permissions
                .iter()
                .filter_map(|p| self.proxy_permission(p, port))
                .collect::<Vec<_>>()
        };
        TrafficPermissions {
            allow_permissions: convert(&ctp.allow_permissions),
            deny_permissions: convert(&ctp.deny_permissions),
        }
    }

    /// Returns `None` when every destination rule of `permission` is limited
    /// to other ports.
    fn proxy_permission(&self, permission: &Permission, port: &str) -> Option<ProxyPermission> {
        let applies = |rule: &&DestinationRule| {
            rule.port_names.is_empty() || rule.port_names.iter().any(|p| p == port)
        };
        if !permission.destination_rules.is_empty()
            && !permission.destination_rules.iter().any(|r| applies(&r))
        {
            return None;
        }

        let destination_rules = permission
            .destination_rules
            .iter()
            .filter(applies)
            .map(|rule| DestinationRule {
                port_names: Vec::new(),
                ..rule.clone()
            })
            .filter(|rule| *rule != DestinationRule::default())
            .collect();

        Some(ProxyPermission {
            principals: permission
                .sources
                .iter()
                .map(|source| self.principal(source))
                .collect(),
            destination_rules,
        })
    }

    fn principal(&self, source: &Source) -> Principal {
        Principal {
            spiffe: self.spiffe_pattern(
                &source.identity_name,
                &source.namespace,
                &source.partition,
            ),
            exclude: source
                .exclude
                .iter()
                .map(|ex| self.spiffe_pattern(&ex.identity_name, &ex.namespace, &ex.partition))
                .collect(),
        }
    }

    /// A regular expression matching the SPIFFE IDs of the selected sources.
    /// An empty identity matches every identity in the namespace; an empty
    /// namespace matches every namespace in the partition.
    fn spiffe_pattern(&self, identity: &str, namespace: &str, partition: &str) -> String {
        let partition = if partition.is_empty() {
            DEFAULT_PARTITION
        } else {
            partition
        };
        let (namespace, identity) = match (namespace, identity) {
            ("", "") => (ANY_SEGMENT, ANY_SEGMENT),
            ("", identity) => (DEFAULT_NAMESPACE, identity),
            (namespace, "") => (namespace, ANY_SEGMENT),
            (namespace, identity) => (namespace, identity),
        };
        format!(
            "^{}$",
            naming::spiffe_id(&self.trust_domain, partition, namespace, identity)
        )
    }
}
