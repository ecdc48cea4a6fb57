use super::{naming, routes::Targets, Builder};
use crate::intermediate::Destination;
use mesh_controller_core::{
    catalog::Protocol,
    mesh::{
        self, BackendTargetDetails, BackendTargetKind, ListenAddr, RouteConfig, NULL_ROUTE_BACKEND,
    },
    proxy_state::{
        BindAddress, Capability, CidrRange, Cluster, ClusterGroup, ClusterTarget, ConnectionTls,
        Direction, EndpointGroup, EndpointGroupKind, FailoverGroup, L4Destination, L7Destination,
        L7Protocol, Listener, Match, Route, RouteRule, Router, RouterDestination,
        TransportSocket, VirtualHost,
    },
};
use tracing::debug;

const OUTBOUND_HOST: &str = "127.0.0.1";
const ORIGINAL_DESTINATION_CONNECT_TIMEOUT_MS: u64 = 5_000;
const NULL_ROUTE_CONNECT_TIMEOUT_MS: u64 = 10_000;

// === impl Builder ===

impl Builder {
    /// Adds the outbound side of the proxy. Explicit destinations get a
    /// listener each; implicit destinations share the transparent outbound
    /// listener, which only exists in transparent mode.
    pub fn build_destinations(mut self, destinations: &[Destination]) -> Self {
        let mut outbound = if self.proxy_cfg.is_transparent_proxy() {
            Some(self.transparent_outbound_listener())
        } else {
            None
        };

        for destination in destinations {
            self.build_destination(outbound.as_mut(), destination);
        }

        if let Some(listener) = outbound {
            self.template.proxy_state.listeners.push(listener);
        }
        self
    }

    fn build_destination(&mut self, outbound: Option<&mut Listener>, destination: &Destination) {
        let cpr = &destination.computed_port_routes;
        let service = &cpr.parent_ref.reference;
        let port = cpr.parent_ref.port.as_str();

        let mut explicit_listener = destination.explicit.as_ref().map(make_explicit_listener);
        let route_name = match &explicit_listener {
            Some(listener) => listener.name.clone(),
            None => naming::destination_resource_id(service, port),
        };
        let router_match = match &destination.explicit {
            Some(_) => None,
            None if destination.virtual_ips.is_empty() => {
                debug!(%service, port, "skipping implicit destination without virtual IPs");
                return;
            }
            None => Some(virtual_ip_match(
                &destination.virtual_ips,
                destination.virtual_port(),
            )),
        };
        let stat_prefix = naming::destination_stat_prefix(service, port, &self.local_datacenter);

        let (router_destination, route_rules) = match &cpr.config {
            RouteConfig::Tcp(route) => {
                let target = route
                    .rules
                    .first()
                    .and_then(|rule| self.cluster_target(&rule.backend_refs, &cpr.targets));
                let target = match target {
                    Some(target) => target,
                    None => {
                        debug!(%service, port, "skipping TCP destination without backends");
                        return;
                    }
                };
                let destination = RouterDestination::L4(L4Destination {
                    target,
                    stat_prefix,
                    traffic_permissions: None,
                    max_inbound_connections: 0,
                });
                (destination, None)
            }
            RouteConfig::Http(_) | RouteConfig::Grpc(_) => {
                let protocol = match L7Protocol::from_protocol(cpr.protocol) {
                    Some(protocol) => protocol,
                    None => {
                        debug!(
                            %service,
                            port,
                            protocol = ?cpr.protocol,
                            "skipping L7 routes on a non-L7 port"
                        );
                        return;
                    }
                };
                let rules = match &cpr.config {
                    RouteConfig::Http(route) => self.http_route_rules(route, &cpr.targets),
                    RouteConfig::Grpc(route) => self.grpc_route_rules(route, &cpr.targets),
                    RouteConfig::Tcp(_) => Vec::new(),
                };
                let destination = RouterDestination::L7(L7Destination {
                    route_name: route_name.clone(),
                    stat_prefix,
                    protocol,
                    static_route: false,
                    traffic_permissions: None,
                    max_inbound_connections: 0,
                });
                (destination, Some(rules))
            }
        };

        let needs_null_route = match (&router_destination, &route_rules) {
            (RouterDestination::L4(l4), _) => targets_null_route(&l4.target),
            (_, Some(rules)) => rules.iter().any(|r| targets_null_route(&r.destination.target)),
            _ => false,
        };

        let router = Router {
            r#match: router_match,
            destination: router_destination,
            inbound_tls: None,
        };
        match (explicit_listener.as_mut(), outbound) {
            (Some(listener), _) => listener.routers.push(router),
            (None, Some(outbound)) => outbound.routers.push(router),
            (None, None) => {
                debug!(%service, port, "no outbound listener for implicit destination");
                return;
            }
        }
        if let Some(listener) = explicit_listener {
            self.template.proxy_state.listeners.push(listener);
        }

        if let Some(rules) = route_rules {
            self.add_destination_route(route_name, rules);
        }
        if needs_null_route {
            self.add_null_route_cluster();
        }
        self.add_target_clusters(&cpr.targets, cpr.protocol);
    }

    /// Emits one cluster per direct target. Failover targets become extra
    /// endpoint groups of the cluster they back up.
    fn add_target_clusters(&mut self, targets: &Targets, protocol: Protocol) {
        let protocol = if protocol == Protocol::Unspecified {
            Protocol::Tcp
        } else {
            protocol
        };

        for details in targets.values() {
            if details.kind != BackendTargetKind::Direct {
                continue;
            }

            let cluster_name = self.target_cluster_name(details);
            let primary_group_name = if details.failover_config.is_some() {
                naming::failover_group_name(0, &cluster_name)
            } else {
                String::new()
            };
            let mut groups = vec![self.endpoint_group(primary_group_name, details)];
            if let Some(endpoints) = &details.service_endpoints_ref {
                self.template
                    .required_endpoints
                    .insert(cluster_name.clone(), endpoints.clone());
            }

            let failovers = details
                .failover_config
                .iter()
                .flat_map(|f| f.destinations.iter())
                .enumerate();
            for (i, failover) in failovers {
                if failover.backend_target == NULL_ROUTE_BACKEND {
                    continue;
                }
                let failover_details = match targets.get(&failover.backend_target) {
                    Some(details) => details,
                    None => continue,
                };
                // The primary target holds index 0.
                let group_name = naming::failover_group_name(i + 1, &cluster_name);
                groups.push(self.endpoint_group(group_name.clone(), failover_details));
                if let Some(endpoints) = &failover_details.service_endpoints_ref {
                    self.template
                        .required_endpoints
                        .insert(group_name, endpoints.clone());
                }
            }

            let connect_timeout_ms = details.destination_config.connect_timeout_ms;
            let group = if groups.len() == 1 {
                ClusterGroup::EndpointGroup(groups.remove(0))
            } else {
                ClusterGroup::FailoverGroup(FailoverGroup {
                    endpoint_groups: groups,
                    connect_timeout_ms,
                    use_alt_stat_name: true,
                })
            };
            self.template.proxy_state.clusters.insert(
                cluster_name.clone(),
                Cluster {
                    alt_stat_name: cluster_name.clone(),
                    name: cluster_name,
                    group,
                    protocol,
                },
            );
        }
    }

    fn endpoint_group(&self, name: String, details: &BackendTargetDetails) -> EndpointGroup {
        let backend = &details.backend_ref;
        let datacenter = if backend.datacenter.is_empty() {
            &self.local_datacenter
        } else {
            &backend.datacenter
        };
        let sni = naming::destination_sni(&backend.reference, datacenter, &self.trust_domain);
        let spiffe_ids = details
            .identity_refs
            .iter()
            .map(|identity| {
                naming::spiffe_id(
                    &self.trust_domain,
                    &identity.tenancy.partition,
                    &identity.tenancy.namespace,
                    &identity.name,
                )
            })
            .collect();

        EndpointGroup {
            name,
            kind: EndpointGroupKind::Dynamic {
                connect_timeout_ms: details.destination_config.connect_timeout_ms,
                disable_panic_threshold: true,
                lb_policy: details.destination_config.load_balancer.clone(),
                outbound_tls: TransportSocket {
                    connection_tls: ConnectionTls::OutboundMesh {
                        identity_key: self.identity_key(),
                        spiffe_ids,
                        trust_bundle_peer_name_key: naming::LOCAL_PEER_KEY.to_string(),
                        sni,
                    },
                    alpn_protocols: vec![naming::alpn_protocol(&backend.port)],
                },
            },
        }
    }

    fn add_destination_route(&mut self, name: String, route_rules: Vec<RouteRule>) {
        let route = Route {
            virtual_hosts: vec![VirtualHost {
                name: name.clone(),
                domains: vec!["*".to_string()],
                route_rules,
            }],
        };
        self.template.proxy_state.routes.insert(name, route);
    }

    fn add_null_route_cluster(&mut self) {
        self.template.proxy_state.clusters.insert(
            naming::NULL_ROUTE_CLUSTER_NAME.to_string(),
            Cluster {
                name: naming::NULL_ROUTE_CLUSTER_NAME.to_string(),
                alt_stat_name: String::new(),
                group: ClusterGroup::EndpointGroup(EndpointGroup {
                    name: String::new(),
                    kind: EndpointGroupKind::Static {
                        connect_timeout_ms: NULL_ROUTE_CONNECT_TIMEOUT_MS,
                        endpoints: Vec::new(),
                    },
                }),
                protocol: Protocol::Tcp,
            },
        );
    }

    /// Traffic that matches no implicit destination is passed through to the
    /// address the application originally dialed.
    fn transparent_outbound_listener(&mut self) -> Listener {
        let cluster = naming::ORIGINAL_DESTINATION_CLUSTER_NAME;
        self.template.proxy_state.clusters.insert(
            cluster.to_string(),
            Cluster {
                name: cluster.to_string(),
                alt_stat_name: String::new(),
                group: ClusterGroup::EndpointGroup(EndpointGroup {
                    name: String::new(),
                    kind: EndpointGroupKind::Passthrough {
                        connect_timeout_ms: ORIGINAL_DESTINATION_CONNECT_TIMEOUT_MS,
                    },
                }),
                protocol: Protocol::Tcp,
            },
        );

        Listener {
            name: naming::OUTBOUND_LISTENER_NAME.to_string(),
            direction: Direction::Outbound,
            bind_address: BindAddress::HostPort {
                host: OUTBOUND_HOST.to_string(),
                port: self.proxy_cfg.outbound_listener_port(),
            },
            routers: Vec::new(),
            default_router: Some(Router {
                r#match: None,
                destination: RouterDestination::L4(L4Destination {
                    target: ClusterTarget::cluster(cluster),
                    stat_prefix: format!("upstream.{cluster}"),
                    traffic_permissions: None,
                    max_inbound_connections: 0,
                }),
                inbound_tls: None,
            }),
            capabilities: vec![Capability::Transparent],
            balance_connections: None,
        }
    }
}

fn make_explicit_listener(destination: &mesh::Destination) -> Listener {
    let bind_address = match &destination.listen_addr {
        ListenAddr::IpPort { ip, port } => BindAddress::HostPort {
            host: ip.clone(),
            port: *port,
        },
        ListenAddr::Unix { path, mode } => BindAddress::UnixSocket {
            path: path.clone(),
            mode: mode.clone(),
        },
    };
    Listener {
        name: naming::destination_listener_name(
            &destination.destination_ref,
            &destination.destination_port,
            &destination.listen_addr,
        ),
        direction: Direction::Outbound,
        bind_address,
        routers: Vec::new(),
        default_router: None,
        capabilities: Vec::new(),
        balance_connections: None,
    }
}

fn virtual_ip_match(virtual_ips: &[String], virtual_port: u32) -> Match {
    Match {
        prefix_ranges: virtual_ips
            .iter()
            .map(|vip| CidrRange {
                address_prefix: vip.clone(),
                prefix_len: 32,
            })
            .collect(),
        destination_port: Some(virtual_port).filter(|port| *port > 0),
        ..Default::default()
    }
}

fn targets_null_route(target: &ClusterTarget) -> bool {
    target
        .cluster_names()
        .contains(&naming::NULL_ROUTE_CLUSTER_NAME)
}
