use crate::BiMapper;
use mesh_controller_core::{Id, Reference, Type};

/// Tracks the backend services each computed routes resource sends traffic
/// to.
#[derive(Debug)]
pub struct ComputedRoutesCache {
    mapper: BiMapper,
}

impl Default for ComputedRoutesCache {
    fn default() -> Self {
        Self {
            mapper: BiMapper::new(Type::ComputedRoutes, Type::Service),
        }
    }
}

impl ComputedRoutesCache {
    pub fn track_computed_routes(
        &self,
        computed_routes: &Reference,
        backends: impl IntoIterator<Item = Reference>,
    ) {
        self.mapper.track_item(computed_routes, backends);
    }

    pub fn untrack_computed_routes(&self, computed_routes: &Reference) {
        self.mapper.untrack_item(computed_routes);
    }

    /// Computed routes that use `service` as a backend.
    pub fn computed_routes_by_service(&self, service: &Reference) -> Vec<Id> {
        self.mapper.item_ids_for_link(service)
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
