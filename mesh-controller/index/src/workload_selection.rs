use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::{catalog::WorkloadSelector, Reference, Type};
use parking_lot::RwLock;

/// Answers which services select a workload.
///
/// Exact names are indexed; prefixes are scanned, since services rarely use
/// more than a handful of them.
#[derive(Debug, Default)]
pub struct WorkloadSelectionCache {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    selectors: HashMap<Reference, WorkloadSelector>,
    by_workload: HashMap<Reference, HashSet<Reference>>,
    with_prefixes: HashSet<Reference>,
}

impl WorkloadSelectionCache {
    pub fn track_service(&self, service: &Reference, selector: &WorkloadSelector) {
        assert_eq!(service.ty, Type::Service, "expected a service, got {service}");
        let mut inner = self.inner.write();
        inner.remove(service);

        for name in &selector.names {
            let workload = Reference::new(Type::Workload, service.tenancy.clone(), name.clone());
            inner
                .by_workload
                .entry(workload)
                .or_default()
                .insert(service.clone());
        }
        if !selector.prefixes.is_empty() {
            inner.with_prefixes.insert(service.clone());
        }
        inner.selectors.insert(service.clone(), selector.clone());
    }

    pub fn untrack_service(&self, service: &Reference) {
        self.inner.write().remove(service);
    }

    /// Services in the workload's tenancy whose selector matches it.
    pub fn services_for_workload(&self, workload: &Reference) -> Vec<Reference> {
        assert_eq!(workload.ty, Type::Workload, "expected a workload, got {workload}");
        let inner = self.inner.read();
        let mut services = inner
            .by_workload
            .get(workload)
            .map(|s| s.iter().cloned().collect::<HashSet<_>>())
            .unwrap_or_default();
        for service in &inner.with_prefixes {
            if service.tenancy != workload.tenancy {
                continue;
            }
            let matches = inner
                .selectors
                .get(service)
                .map_or(false, |s| s.prefixes.iter().any(|p| workload.name.starts_with(p)));
            if matches {
                services.insert(service.clone());
            }
        }
        let mut services = services.into_iter().collect::<Vec<_>>();
        services.sort();
        services
    }

    pub fn selector(&self, service: &Reference) -> Option<WorkloadSelector> {
        self.inner.read().selectors.get(service).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn remove(&mut self, service: &Reference) {
        let selector = match self.selectors.remove(service) {
            Some(s) => s,
            None => return,
        };
        for name in &selector.names {
            let workload = Reference::new(Type::Workload, service.tenancy.clone(), name.clone());
            if let Some(services) = self.by_workload.get_mut(&workload) {
                services.remove(service);
                if services.is_empty() {
                    self.by_workload.remove(&workload);
                }
            }
        }
        self.with_prefixes.remove(service);
    }
}
