use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::{Id, Reference, Type};
use parking_lot::RwLock;

/// Tracks which proxies point at each explicit destination `(service, port)`.
#[derive(Debug, Default)]
pub struct DestinationsCache {
    inner: RwLock<Inner>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey {
    pub service_ref: Reference,
    pub port: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationRef {
    pub service_ref: Reference,
    pub port: String,

    /// The resource that declared the destination.
    pub explicit_destinations_id: Id,

    pub source_proxies: HashSet<Reference>,
}

#[derive(Debug, Default)]
struct Inner {
    store: HashMap<DestinationKey, DestinationRef>,
    source_proxies: HashMap<Reference, HashSet<DestinationKey>>,
    ports_by_service: HashMap<Reference, HashSet<String>>,
}

// === impl DestinationKey ===

impl DestinationKey {
    pub fn new(service_ref: Reference, port: impl Into<String>) -> Self {
        Self {
            service_ref,
            port: port.into(),
        }
    }
}

// === impl DestinationRef ===

impl DestinationRef {
    pub fn key(&self) -> DestinationKey {
        DestinationKey::new(self.service_ref.clone(), self.port.clone())
    }
}

// === impl DestinationsCache ===

impl DestinationsCache {
    /// Replaces the record for the destination's `(service, port)`.
    pub fn write_destination(&self, destination: DestinationRef) {
        check_type(&destination.service_ref, Type::Service);
        check_type(
            &destination.explicit_destinations_id.reference(),
            Type::ComputedExplicitDestinations,
        );
        for proxy in &destination.source_proxies {
            check_type(proxy, Type::ProxyStateTemplate);
        }

        let mut inner = self.inner.write();
        inner.delete(&destination.key());
        inner.insert(destination);
    }

    pub fn delete_destination(&self, service_ref: &Reference, port: &str) {
        check_type(service_ref, Type::Service);
        self.inner
            .write()
            .delete(&DestinationKey::new(service_ref.clone(), port));
    }

    /// Removes `proxy` from every destination it points at. Destinations that
    /// no longer have any source proxy are dropped.
    pub fn delete_source_proxy(&self, proxy: &Reference) {
        check_type(proxy, Type::ProxyStateTemplate);
        let mut inner = self.inner.write();
        let keys = match inner.source_proxies.remove(proxy) {
            Some(keys) => keys,
            None => return,
        };
        for key in keys {
            inner.remove_source(&key, proxy);
        }
    }

    pub fn read_destination(&self, service_ref: &Reference, port: &str) -> Option<DestinationRef> {
        self.inner
            .read()
            .store
            .get(&DestinationKey::new(service_ref.clone(), port))
            .cloned()
    }

    pub fn destinations_by_source_proxy(&self, proxy: &Reference) -> Vec<DestinationRef> {
        check_type(proxy, Type::ProxyStateTemplate);
        let inner = self.inner.read();
        let mut keys = inner
            .source_proxies
            .get(proxy)
            .map(|keys| keys.iter().collect::<Vec<_>>())
            .unwrap_or_default();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| inner.store.get(k).cloned())
            .collect()
    }

    /// Every destination record for `service_ref`, across all of its ports.
    pub fn destinations_by_service(&self, service_ref: &Reference) -> Vec<DestinationRef> {
        check_type(service_ref, Type::Service);
        let inner = self.inner.read();
        let mut ports = inner
            .ports_by_service
            .get(service_ref)
            .map(|ports| ports.iter().collect::<Vec<_>>())
            .unwrap_or_default();
        ports.sort();
        ports
            .into_iter()
            .filter_map(|port| {
                inner
                    .store
                    .get(&DestinationKey::new(service_ref.clone(), port.clone()))
                    .cloned()
            })
            .collect()
    }

    /// Sets the full list of destinations `proxy` points at, as declared by
    /// `explicit_destinations_id`.
    ///
    /// Keys the proxy no longer declares lose it as a source; records left
    /// without sources are deleted.
    pub fn track_source_proxy(
        &self,
        proxy: &Reference,
        explicit_destinations_id: &Id,
        keys: impl IntoIterator<Item = DestinationKey>,
    ) {
        check_type(proxy, Type::ProxyStateTemplate);
        check_type(
            &explicit_destinations_id.reference(),
            Type::ComputedExplicitDestinations,
        );
        let keys = keys
            .into_iter()
            .inspect(|k| check_type(&k.service_ref, Type::Service))
            .collect::<HashSet<_>>();

        let mut inner = self.inner.write();
        let old = inner.source_proxies.remove(proxy).unwrap_or_default();
        for stale in old.difference(&keys) {
            inner.remove_source(stale, proxy);
        }

        for key in &keys {
            inner
                .ports_by_service
                .entry(key.service_ref.clone())
                .or_default()
                .insert(key.port.clone());
            inner
                .store
                .entry(key.clone())
                .or_insert_with(|| DestinationRef {
                    service_ref: key.service_ref.clone(),
                    port: key.port.clone(),
                    explicit_destinations_id: explicit_destinations_id.clone(),
                    source_proxies: HashSet::new(),
                })
                .source_proxies
                .insert(proxy.clone());
        }
        if !keys.is_empty() {
            inner.source_proxies.insert(proxy.clone(), keys);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_proxies_len(&self) -> usize {
        self.inner.read().source_proxies.len()
    }

    /// Returns true if every record's source proxies have a reverse entry
    /// pointing back at the record and vice versa.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let forward = inner.store.iter().all(|(key, d)| {
            d.source_proxies.iter().all(|p| {
                inner
                    .source_proxies
                    .get(p)
                    .map_or(false, |keys| keys.contains(key))
            })
        });
        let reverse = inner.source_proxies.iter().all(|(proxy, keys)| {
            keys.iter().all(|k| {
                inner
                    .store
                    .get(k)
                    .map_or(false, |d| d.source_proxies.contains(proxy))
            })
        });
        let services = inner.store.keys().all(|k| {
            inner
                .ports_by_service
                .get(&k.service_ref)
                .map_or(false, |ports| ports.contains(&k.port))
        });
        forward && reverse && services
    }
}

// === impl Inner ===

impl Inner {
    fn insert(&mut self, destination: DestinationRef) {
        let key = destination.key();
        for proxy in &destination.source_proxies {
            self.source_proxies
                .entry(proxy.clone())
                .or_default()
                .insert(key.clone());
        }
        self.ports_by_service
            .entry(key.service_ref.clone())
            .or_default()
            .insert(key.port.clone());
        self.store.insert(key, destination);
    }

    fn delete(&mut self, key: &DestinationKey) {
        let destination = match self.store.remove(key) {
            Some(d) => d,
            None => return,
        };
        for proxy in &destination.source_proxies {
            if let Some(keys) = self.source_proxies.get_mut(proxy) {
                keys.remove(key);
                if keys.is_empty() {
                    self.source_proxies.remove(proxy);
                }
            }
        }
        self.forget_port(key);
    }

    /// Drops `proxy` from the record at `key` without touching the proxy's
    /// reverse entry, which the caller owns.
    fn remove_source(&mut self, key: &DestinationKey, proxy: &Reference) {
        let empty = match self.store.get_mut(key) {
            Some(d) => {
                d.source_proxies.remove(proxy);
                d.source_proxies.is_empty()
            }
            // The proxy pointed at a record that was already deleted.
            None => return,
        };
        if empty {
            self.store.remove(key);
            self.forget_port(key);
        }
    }

    fn forget_port(&mut self, key: &DestinationKey) {
        if let Some(ports) = self.ports_by_service.get_mut(&key.service_ref) {
            ports.remove(&key.port);
            if ports.is_empty() {
                self.ports_by_service.remove(&key.service_ref);
            }
        }
    }
}

fn check_type(r: &Reference, ty: Type) {
    assert_eq!(r.ty, ty, "expected a {ty} reference, got {r}");
}
