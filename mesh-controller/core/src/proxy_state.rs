//! The desired sidecar configuration produced for each mesh workload.
//!
//! Every map is ordered so that equal templates serialize identically.

use crate::{
    auth::DestinationRule,
    catalog::Protocol,
    codec::ResourceData,
    mesh::{EndpointRef, HeaderMatch, LoadBalancer, PathMatch, RouteRetries, RouteTimeouts},
    Reference, Type,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStateTemplate {
    pub proxy_state: ProxyState,
    #[serde(default)]
    pub required_endpoints: BTreeMap<String, EndpointRef>,
    #[serde(default)]
    pub required_leaf_certificates: BTreeMap<String, LeafCertificateRef>,
    #[serde(default)]
    pub required_trust_bundles: BTreeMap<String, TrustBundleRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Reference>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub clusters: BTreeMap<String, Cluster>,
    #[serde(default)]
    pub routes: BTreeMap<String, Route>,
    #[serde(default)]
    pub traffic_permission_default_allow: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCertificateRef {
    pub name: String,
    pub namespace: String,
    pub partition: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundleRef {
    pub peer: String,
    pub trust_domain: String,
}

// === Listeners ===

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub direction: Direction,
    pub bind_address: BindAddress,
    #[serde(default)]
    pub routers: Vec<Router>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_router: Option<Router>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_connections: Option<BalanceConnections>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindAddress {
    HostPort { host: String, port: u32 },
    UnixSocket { path: String, mode: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transparent,
    L4TlsInspection,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceConnections {
    Exact,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#match: Option<Match>,
    pub destination: RouterDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_tls: Option<TransportSocket>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    #[serde(default)]
    pub prefix_ranges: Vec<CidrRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u32>,
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
    #[serde(default)]
    pub server_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrRange {
    pub address_prefix: String,
    pub prefix_len: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterDestination {
    L4(L4Destination),
    L7(L7Destination),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4Destination {
    pub target: ClusterTarget,
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_permissions: Option<TrafficPermissions>,
    #[serde(default)]
    pub max_inbound_connections: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L7Destination {
    pub route_name: String,
    pub stat_prefix: String,
    pub protocol: L7Protocol,
    #[serde(default)]
    pub static_route: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_permissions: Option<TrafficPermissions>,
    #[serde(default)]
    pub max_inbound_connections: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L7Protocol {
    Http,
    Http2,
    Grpc,
}

/// Either a single cluster or a weighted split across clusters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTarget {
    Cluster { name: String },
    WeightedClusters(Vec<WeightedCluster>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedCluster {
    pub name: String,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSocket {
    pub connection_tls: ConnectionTls,
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionTls {
    InboundMesh {
        identity_key: String,
        trust_bundle_peer_name_keys: Vec<String>,
    },
    OutboundMesh {
        identity_key: String,
        spiffe_ids: Vec<String>,
        trust_bundle_peer_name_key: String,
        sni: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPermissions {
    #[serde(default)]
    pub allow_permissions: Vec<ProxyPermission>,
    #[serde(default)]
    pub deny_permissions: Vec<ProxyPermission>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPermission {
    #[serde(default)]
    pub principals: Vec<Principal>,
    #[serde(default)]
    pub destination_rules: Vec<DestinationRule>,
}

/// A SPIFFE ID pattern with optional exclusions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub spiffe: String,
    #[serde(default)]
    pub exclude: Vec<String>,
}

// === Clusters ===

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alt_stat_name: String,
    pub group: ClusterGroup,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterGroup {
    EndpointGroup(EndpointGroup),
    FailoverGroup(FailoverGroup),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverGroup {
    pub endpoint_groups: Vec<EndpointGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub use_alt_stat_name: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGroup {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub kind: EndpointGroupKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointGroupKind {
    Dynamic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connect_timeout_ms: Option<u64>,
        #[serde(default)]
        disable_panic_threshold: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lb_policy: Option<LoadBalancer>,
        outbound_tls: TransportSocket,
    },
    Static {
        connect_timeout_ms: u64,
        #[serde(default)]
        endpoints: Vec<StaticEndpoint>,
    },
    Passthrough {
        connect_timeout_ms: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticEndpoint {
    pub host: String,
    pub port: u32,
}

// === Routes ===

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub route_rules: Vec<RouteRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub r#match: RouteMatch,
    pub destination: RouteDestination,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub target: ClusterTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<RouteTimeouts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RouteRetries>,
}

// === impl ProxyStateTemplate ===

impl ResourceData for ProxyStateTemplate {
    const TYPE: Type = Type::ProxyStateTemplate;
}

impl ProxyStateTemplate {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.proxy_state.listeners.iter().find(|l| l.name == name)
    }

    pub fn outbound_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.proxy_state
            .listeners
            .iter()
            .filter(|l| l.direction == Direction::Outbound)
    }
}

// === impl ClusterTarget ===

impl ClusterTarget {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self::Cluster { name: name.into() }
    }

    pub fn cluster_names(&self) -> Vec<&str> {
        match self {
            Self::Cluster { name } => vec![name.as_str()],
            Self::WeightedClusters(clusters) => clusters.iter().map(|c| c.name.as_str()).collect(),
        }
    }
}

// === impl L7Protocol ===

impl L7Protocol {
    pub fn from_protocol(protocol: Protocol) -> Option<Self> {
        match protocol {
            Protocol::Http => Some(Self::Http),
            Protocol::Http2 => Some(Self::Http2),
            Protocol::Grpc => Some(Self::Grpc),
            Protocol::Tcp | Protocol::Mesh | Protocol::Unspecified => None,
        }
    }
}
