use crate::BiMapper;
use mesh_controller_core::{Id, Reference, Type};

/// Tracks the proxy configurations that apply to each proxy.
#[derive(Debug)]
pub struct ProxyConfigurationCache {
    mapper: BiMapper,
}

impl Default for ProxyConfigurationCache {
    fn default() -> Self {
        Self {
            mapper: BiMapper::new(Type::ProxyConfiguration, Type::ProxyStateTemplate),
        }
    }
}

impl ProxyConfigurationCache {
    /// Replaces the set of proxies `proxy_cfg` selects.
    pub fn track_proxy_configuration(
        &self,
        proxy_cfg: &Reference,
        proxies: impl IntoIterator<Item = Reference>,
    ) {
        self.mapper.track_item(proxy_cfg, proxies);
    }

    pub fn untrack_proxy_configuration(&self, proxy_cfg: &Reference) {
        self.mapper.untrack_item(proxy_cfg);
    }

    pub fn untrack_proxy_id(&self, proxy: &Reference) {
        self.mapper.untrack_link(proxy);
    }

    /// Sorted by name so that merging them is deterministic.
    pub fn proxy_configurations_by_proxy_id(&self, proxy: &Reference) -> Vec<Id> {
        self.mapper.item_ids_for_link(proxy)
    }

    pub fn proxies_for_proxy_configuration(&self, proxy_cfg: &Reference) -> Vec<Id> {
        self.mapper.link_ids_for_item(proxy_cfg)
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
