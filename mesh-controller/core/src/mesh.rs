use crate::{
    catalog::{Protocol, WorkloadSelector},
    codec::ResourceData,
    Id, Reference, Type,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Backend target name that routes traffic nowhere.
pub const NULL_ROUTE_BACKEND: &str = "NULL-ROUTE";

pub const DEFAULT_OUTBOUND_LISTENER_PORT: u32 = 15001;

// === Destinations ===

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedExplicitDestinations {
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub destination_ref: Reference,
    pub destination_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    pub listen_addr: ListenAddr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenAddr {
    IpPort {
        ip: String,
        port: u32,
    },
    Unix {
        path: String,
        #[serde(default)]
        mode: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedImplicitDestinations {
    #[serde(default)]
    pub destinations: Vec<ImplicitDestination>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplicitDestination {
    pub destination_ref: Reference,
    #[serde(default)]
    pub destination_ports: Vec<String>,
}

// === ComputedRoutes ===

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedRoutes {
    #[serde(default)]
    pub ported_configs: BTreeMap<String, ComputedPortRoutes>,
    #[serde(default)]
    pub bound_references: Vec<Reference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedPortRoutes {
    pub config: RouteConfig,
    pub parent_ref: ParentReference,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub targets: BTreeMap<String, BackendTargetDetails>,
    #[serde(default)]
    pub using_default_config: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentReference {
    pub reference: Reference,
    pub port: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteConfig {
    Tcp(ComputedTcpRoute),
    Http(ComputedHttpRoute),
    Grpc(ComputedGrpcRoute),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedTcpRoute {
    #[serde(default)]
    pub rules: Vec<ComputedTcpRouteRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedTcpRouteRule {
    #[serde(default)]
    pub backend_refs: Vec<ComputedBackendRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedBackendRef {
    pub backend_target: String,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedHttpRoute {
    #[serde(default)]
    pub rules: Vec<ComputedHttpRouteRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedHttpRouteRule {
    #[serde(default)]
    pub matches: Vec<HttpRouteMatch>,
    #[serde(default)]
    pub backend_refs: Vec<ComputedBackendRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<RouteTimeouts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RouteRetries>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedGrpcRoute {
    #[serde(default)]
    pub rules: Vec<ComputedGrpcRouteRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedGrpcRouteRule {
    #[serde(default)]
    pub matches: Vec<GrpcRouteMatch>,
    #[serde(default)]
    pub backend_refs: Vec<ComputedBackendRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<RouteTimeouts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RouteRetries>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcRouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub kind: HeaderMatchKind,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMatchKind {
    #[default]
    Exact,
    Prefix,
    Suffix,
    Regex,
    Present,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTimeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRetries {
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub on_connect_failure: bool,
    #[serde(default)]
    pub on_conditions: Vec<String>,
    #[serde(default)]
    pub on_status_codes: Vec<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTargetKind {
    #[default]
    Direct,
    Indirect,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTargetDetails {
    #[serde(default)]
    pub kind: BackendTargetKind,
    pub backend_ref: BackendReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_config: Option<ComputedFailoverConfig>,
    #[serde(default)]
    pub destination_config: DestinationConfig,

    /// Resolved at fetch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoints_ref: Option<EndpointRef>,

    /// Resolved at fetch time.
    #[serde(default)]
    pub identity_refs: Vec<Reference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReference {
    pub reference: Reference,
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedFailoverConfig {
    #[serde(default)]
    pub destinations: Vec<ComputedFailoverDestination>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedFailoverDestination {
    pub backend_target: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancer {
    Random,
    RoundRobin,
    LeastRequest { choice_count: u32 },
    Maglev,
    RingHash { min_ring_size: u64, max_ring_size: u64 },
}

/// Points a cluster at the endpoints that back it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    pub id: Id,
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mesh_port: String,
}

// === ProxyConfiguration ===

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfiguration {
    #[serde(default)]
    pub workloads: WorkloadSelector,
    #[serde(default)]
    pub dynamic_config: DynamicConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparent_proxy: Option<TransparentProxy>,
    #[serde(default)]
    pub mesh_gateway_mode: MeshGatewayMode,
    #[serde(default)]
    pub local_connection: BTreeMap<String, ConnectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_connections: Option<InboundConnectionsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_config: Option<ExposeConfig>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    Default,
    Transparent,
    Direct,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshGatewayMode {
    #[default]
    Unspecified,
    None,
    Local,
    Remote,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentProxy {
    #[serde(default)]
    pub outbound_listener_port: u32,
    #[serde(default)]
    pub dialed_directly: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundConnectionsConfig {
    #[serde(default)]
    pub max_inbound_connections: u32,
    #[serde(default)]
    pub balance_inbound_connections: BalanceConnections,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceConnections {
    #[default]
    Default,
    Exact,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposeConfig {
    #[serde(default)]
    pub expose_paths: Vec<ExposePath>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposePath {
    pub listener_port: u32,
    pub path: String,
    pub local_path_port: u32,
    #[serde(default)]
    pub protocol: ExposePathProtocol,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposePathProtocol {
    #[default]
    Http,
    Http2,
}

// === impl ComputedExplicitDestinations ===

impl ResourceData for ComputedExplicitDestinations {
    const TYPE: Type = Type::ComputedExplicitDestinations;
}

// === impl ComputedImplicitDestinations ===

impl ResourceData for ComputedImplicitDestinations {
    const TYPE: Type = Type::ComputedImplicitDestinations;
}

// === impl ComputedRoutes ===

impl ResourceData for ComputedRoutes {
    const TYPE: Type = Type::ComputedRoutes;
}

impl ComputedRoutes {
    /// Every service referenced as a backend by any port's targets.
    pub fn backend_services(&self) -> Vec<Reference> {
        let mut refs = self
            .ported_configs
            .values()
            .flat_map(|cpr| cpr.targets.values())
            .map(|t| t.backend_ref.reference.clone())
            .collect::<Vec<_>>();
        refs.sort();
        refs.dedup();
        refs
    }
}

// === impl ProxyConfiguration ===

impl ResourceData for ProxyConfiguration {
    const TYPE: Type = Type::ProxyConfiguration;
}

impl ProxyConfiguration {
    pub fn is_transparent_proxy(&self) -> bool {
        self.dynamic_config.mode == ProxyMode::Transparent
    }

    pub fn outbound_listener_port(&self) -> u32 {
        self.dynamic_config
            .transparent_proxy
            .as_ref()
            .map(|tp| tp.outbound_listener_port)
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_OUTBOUND_LISTENER_PORT)
    }

    /// Overlays the fields `other` sets on top of this configuration.
    pub fn merge(&mut self, other: &ProxyConfiguration) {
        self.dynamic_config.merge(&other.dynamic_config);
    }
}

impl DynamicConfig {
    pub fn merge(&mut self, other: &DynamicConfig) {
        if other.mode != ProxyMode::Default {
            self.mode = other.mode;
        }
        if let Some(tp) = &other.transparent_proxy {
            let mine = self.transparent_proxy.get_or_insert_with(Default::default);
            if tp.outbound_listener_port != 0 {
                mine.outbound_listener_port = tp.outbound_listener_port;
            }
            mine.dialed_directly |= tp.dialed_directly;
        }
        if other.mesh_gateway_mode != MeshGatewayMode::Unspecified {
            self.mesh_gateway_mode = other.mesh_gateway_mode;
        }
        self.local_connection.extend(
            other
                .local_connection
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if other.inbound_connections.is_some() {
            self.inbound_connections = other.inbound_connections.clone();
        }
        if let Some(expose) = &other.expose_config {
            self.expose_config
                .get_or_insert_with(Default::default)
                .expose_paths
                .extend(expose.expose_paths.iter().cloned());
        }
    }
}
