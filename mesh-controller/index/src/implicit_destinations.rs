use crate::BiMapper;
use mesh_controller_core::{Id, Reference, Type};

/// Tracks the services each identity-aligned implicit destinations resource
/// names.
#[derive(Debug)]
pub struct ImplicitDestinationsCache {
    mapper: BiMapper,
}

impl Default for ImplicitDestinationsCache {
    fn default() -> Self {
        Self {
            mapper: BiMapper::new(Type::ComputedImplicitDestinations, Type::Service),
        }
    }
}

impl ImplicitDestinationsCache {
    pub fn track_implicit_destinations(
        &self,
        implicit_destinations: &Reference,
        services: impl IntoIterator<Item = Reference>,
    ) {
        self.mapper.track_item(implicit_destinations, services);
    }

    pub fn untrack_implicit_destinations(&self, implicit_destinations: &Reference) {
        self.mapper.untrack_item(implicit_destinations);
    }

    /// Implicit destinations resources that name `service`.
    pub fn implicit_destinations_by_service(&self, service: &Reference) -> Vec<Id> {
        self.mapper.item_ids_for_link(service)
    }

    /// True if an implicit destinations resource is known for `identity`.
    pub fn has_identity(&self, identity: &Reference) -> bool {
        self.mapper
            .has_item(&identity.replace_type(Type::ComputedImplicitDestinations))
    }

    pub fn len(&self) -> usize {
        self.mapper.items_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_consistent(&self) -> bool {
        self.mapper.is_consistent()
    }
}
