use crate::BiMapper;
use mesh_controller_core::{Id, Reference, Type};

/// Tracks which proxies run as each workload identity.
#[derive(Debug)]
pub struct IdentitiesCache {
    mapper: BiMapper,
}

impl Default for IdentitiesCache {
    fn default() -> Self {
        Self {
            mapper: BiMapper::new(Type::ProxyStateTemplate, Type::WorkloadIdentity),
        }
    }
}

impl IdentitiesCache {
    /// Records that `proxy` runs as `identity`, replacing any identity it was
    /// previously tracked with.
    pub fn track_pair(&self, identity: &Reference, proxy: &Reference) {
        self.mapper.track_item(proxy, Some(identity.clone()));
    }

    pub fn untrack_proxy_id(&self, proxy: &Reference) {
        self.mapper.untrack_item(proxy);
    }

    pub fn proxy_ids_by_workload_identity(&self, identity: &Reference) -> Vec<Id> {
        self.mapper.item_ids_for_link(identity)
    }

    pub fn workload_identity_for_proxy(&self, proxy: &Reference) -> Option<Reference> {
        self.mapper.link_refs_for_item(proxy).into_iter().next()
    }

    /// Every identity at least one proxy runs as.
    pub fn workload_identities(&self) -> Vec<Reference> {
        self.mapper.links()
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
