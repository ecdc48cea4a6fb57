//! Names of the listeners, clusters and routes in a proxy state template.
//!
//! Proxies and the components that consume templates match on these names,
//! so they must stay stable.

use mesh_controller_core::{mesh::ListenAddr, Reference, DEFAULT_PARTITION};

pub const PUBLIC_LISTENER_NAME: &str = "public_listener";
pub const OUTBOUND_LISTENER_NAME: &str = "outbound_listener";
pub const LOCAL_APP_CLUSTER_PREFIX: &str = "local_app";
pub const ORIGINAL_DESTINATION_CLUSTER_NAME: &str = "original-destination";
pub const NULL_ROUTE_CLUSTER_NAME: &str = "null_route_cluster";

/// The trust bundle of the local peer.
pub const LOCAL_PEER_KEY: &str = "local";

pub fn destination_sni(service: &Reference, datacenter: &str, trust_domain: &str) -> String {
    let tenancy = &service.tenancy;
    if tenancy.partition == DEFAULT_PARTITION {
        format!(
            "{}.{}.{datacenter}.internal.{trust_domain}",
            service.name, tenancy.namespace
        )
    } else {
        format!(
            "{}.{}.{}.{datacenter}.internal-v1.{trust_domain}",
            service.name, tenancy.namespace, tenancy.partition
        )
    }
}

pub fn destination_stat_prefix(service: &Reference, port: &str, datacenter: &str) -> String {
    format!(
        "upstream.{port}.{}.{}.{}.{datacenter}",
        service.name, service.tenancy.namespace, service.tenancy.partition
    )
}

pub fn destination_resource_id(service: &Reference, port: &str) -> String {
    format!("{}/{}:{port}", service.tenancy, service.name)
}

pub fn destination_listener_name(service: &Reference, port: &str, addr: &ListenAddr) -> String {
    let id = destination_resource_id(service, port);
    match addr {
        ListenAddr::IpPort { ip, port } => format!("{id}:{ip}:{port}"),
        ListenAddr::Unix { path, .. } => format!("{id}:{path}"),
    }
}

pub fn cluster_name(port: &str, sni: &str) -> String {
    format!("{port}.{sni}")
}

/// The endpoint group of the `index`th failover target of `cluster`. Index 0
/// is the primary target.
pub fn failover_group_name(index: usize, cluster: &str) -> String {
    format!("failover-target~{index}~{cluster}")
}

pub fn local_app_cluster_name(port: &str) -> String {
    format!("{LOCAL_APP_CLUSTER_PREFIX}:{port}")
}

pub fn local_app_route_name(port: &str) -> String {
    format!("{PUBLIC_LISTENER_NAME}:{port}")
}

pub fn exposed_path_listener_name(listener_port: u32) -> String {
    format!("exposed_path_{listener_port}")
}

pub fn exposed_path_route_name(listener_port: u32, path: &str) -> String {
    format!("exposed_path_route_{listener_port}_{}", path.trim_start_matches('/'))
}

pub fn exposed_cluster_name(local_path_port: u32) -> String {
    format!("exposed_cluster_{local_path_port}")
}

pub fn alpn_protocol(port: &str) -> String {
    format!("consul~{port}")
}

pub fn spiffe_id(trust_domain: &str, partition: &str, namespace: &str, identity: &str) -> String {
    format!("spiffe://{trust_domain}/ap/{partition}/ns/{namespace}/identity/{identity}")
}
