use crate::{codec::ResourceData, Id, Type};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key set on workloads that run a gateway rather than a sidecar.
pub const GATEWAY_KIND_METADATA_KEY: &str = "gateway-kind";

/// Name of the service fronting a partition's mesh gateways.
pub const MESH_GATEWAY_NAME: &str = "mesh-gateway";

/// Port name on mesh gateways that accepts cross-partition traffic.
pub const MESH_GATEWAY_PORT: &str = "wan";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Unspecified,
    Tcp,
    Http,
    Http2,
    Grpc,
    Mesh,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub addresses: Vec<WorkloadAddress>,
    #[serde(default)]
    pub ports: BTreeMap<String, WorkloadPort>,
    #[serde(default)]
    pub identity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadAddress {
    pub host: String,
    /// Names of the ports bound on this address. Empty means every port.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub external: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPort {
    pub port: u32,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSelector {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub workloads: WorkloadSelector,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub virtual_ips: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub target_port: String,
    #[serde(default)]
    pub virtual_port: u32,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<Id>,
    #[serde(default)]
    pub addresses: Vec<WorkloadAddress>,
    #[serde(default)]
    pub ports: BTreeMap<String, WorkloadPort>,
    #[serde(default)]
    pub identity: String,
}

// === impl Protocol ===

impl Protocol {
    pub fn is_http_like(self) -> bool {
        matches!(self, Self::Http | Self::Http2 | Self::Grpc)
    }
}

// === impl Workload ===

impl ResourceData for Workload {
    const TYPE: Type = Type::Workload;
}

impl Workload {
    pub fn is_mesh_enabled(&self) -> bool {
        self.mesh_port().is_some()
    }

    pub fn mesh_port(&self) -> Option<(&str, &WorkloadPort)> {
        self.ports
            .iter()
            .find(|(_, p)| p.protocol == Protocol::Mesh)
            .map(|(name, p)| (name.as_str(), p))
    }
}

// === impl WorkloadAddress ===

impl WorkloadAddress {
    pub fn binds_port(&self, name: &str) -> bool {
        self.ports.is_empty() || self.ports.iter().any(|p| p == name)
    }
}

// === impl WorkloadSelector ===

impl WorkloadSelector {
    pub fn matches(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) || self.prefixes.iter().any(|p| name.starts_with(p))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.prefixes.is_empty()
    }
}

// === impl Service ===

impl ResourceData for Service {
    const TYPE: Type = Type::Service;
}

impl Service {
    pub fn is_mesh_enabled(&self) -> bool {
        self.ports.iter().any(|p| p.protocol == Protocol::Mesh)
    }

    pub fn find_port(&self, name: &str) -> Option<&ServicePort> {
        self.ports.iter().find(|p| p.target_port == name)
    }
}

// === impl ServiceEndpoints ===

impl ResourceData for ServiceEndpoints {
    const TYPE: Type = Type::ServiceEndpoints;
}

impl ServiceEndpoints {
    /// The distinct, sorted workload identity names backing these endpoints.
    pub fn identities(&self) -> Vec<String> {
        let mut ids = self
            .endpoints
            .iter()
            .filter(|ep| !ep.identity.is_empty())
            .map(|ep| ep.identity.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }
}
