use mesh_controller_core::{
    catalog::Service,
    mesh::{self, ComputedPortRoutes},
    Decoded, Reference,
};

/// One fully resolved upstream of a proxy: a service port together with its
/// routes, whose targets carry endpoint and identity references.
#[derive(Clone, Debug, PartialEq)]
pub struct Destination {
    /// Set for destinations the proxy declared. Implicit destinations have
    /// no listener of their own.
    pub explicit: Option<mesh::Destination>,
    pub service: Decoded<Service>,
    pub computed_port_routes: ComputedPortRoutes,
    pub virtual_ips: Vec<String>,
}

impl Destination {
    pub fn service_ref(&self) -> Reference {
        self.service.resource.reference()
    }

    pub fn port(&self) -> &str {
        &self.computed_port_routes.parent_ref.port
    }

    /// The virtual port the service exposes for this destination's port.
    pub fn virtual_port(&self) -> u32 {
        self.service
            .data
            .find_port(self.port())
            .map(|p| p.virtual_port)
            .unwrap_or_default()
    }
}
