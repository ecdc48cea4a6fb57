use super::{Store, WatchEvent, WatchStream};
use crate::{Error, Id, Reference, Resource, Status, Tenancy, Type};
use ahash::AHashMap as HashMap;
use futures::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// An in-memory [`Store`] with a broadcast watch.
///
/// Events are published while the state lock is held so that every watcher
/// observes changes in commit order.
#[derive(Debug)]
pub struct MemStore {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

#[derive(Debug, Default)]
struct State {
    resources: HashMap<Reference, Resource>,
    version: u64,
    uid: u64,
}

// === impl MemStore ===

impl Default for MemStore {
    fn default() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bounds the number of undelivered events a watcher may buffer before it
    /// observes [`WatchEvent::Lagged`].
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn read(&self, id: &Id) -> Result<Resource, Error> {
        self.state
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    async fn write(&self, mut resource: Resource) -> Result<Resource, Error> {
        let mut state = self.state.lock();
        let key = resource.id.reference();
        let version = state.next_version();

        match state.resources.get(&key) {
            Some(existing) => {
                if !resource.id.uid.is_empty() && resource.id.uid != existing.id.uid {
                    return Err(Error::NotFound(resource.id));
                }
                if resource.version != 0 && resource.version != existing.version {
                    return Err(Error::Conflict {
                        id: existing.id.clone(),
                        expected: resource.version,
                        actual: existing.version,
                    });
                }
                resource.id.uid = existing.id.uid.clone();
                resource.generation = if existing.data == resource.data {
                    existing.generation
                } else {
                    version
                };
                resource.status = existing.status.clone();
                if resource.owner.is_none() {
                    resource.owner = existing.owner.clone();
                }
            }
            None => {
                if resource.version != 0 {
                    return Err(Error::Conflict {
                        id: resource.id.clone(),
                        expected: resource.version,
                        actual: 0,
                    });
                }
                if resource.id.uid.is_empty() {
                    resource.id.uid = state.next_uid();
                }
                resource.generation = version;
                resource.status.clear();
            }
        }

        resource.version = version;
        state.resources.insert(key, resource.clone());
        tracing::trace!(id = %resource.id, version, "wrote resource");
        self.publish(WatchEvent::Upsert(resource.clone()));
        Ok(resource)
    }

    async fn delete(&self, id: &Id) -> Result<(), Error> {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        state.remove_cascade(id, &mut removed);
        for resource in removed {
            tracing::trace!(id = %resource.id, "deleted resource");
            self.publish(WatchEvent::Delete(resource));
        }
        Ok(())
    }

    async fn list(
        &self,
        ty: Type,
        tenancy: &Tenancy,
        name_prefix: Option<&str>,
    ) -> Result<Vec<Resource>, Error> {
        let state = self.state.lock();
        let mut resources = state
            .resources
            .values()
            .filter(|r| r.id.ty == ty && tenancy.contains(&r.id.tenancy))
            .filter(|r| name_prefix.map_or(true, |p| r.id.name.starts_with(p)))
            .cloned()
            .collect::<Vec<_>>();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn write_status(&self, id: &Id, key: &str, status: Status) -> Result<Resource, Error> {
        let mut state = self.state.lock();
        if state.get(id).is_none() {
            return Err(Error::NotFound(id.clone()));
        }
        let version = state.next_version();
        let resource = match state.resources.get_mut(&id.reference()) {
            Some(resource) => resource,
            None => return Err(Error::NotFound(id.clone())),
        };
        resource.status.insert(key.to_string(), status);
        resource.version = version;
        let resource = resource.clone();
        self.publish(WatchEvent::Upsert(resource.clone()));
        Ok(resource)
    }

    fn watch(&self, ty: Type) -> WatchStream {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |event| {
                future::ready(match event {
                    Ok(WatchEvent::Upsert(r)) if r.id.ty == ty => Some(WatchEvent::Upsert(r)),
                    Ok(WatchEvent::Delete(r)) if r.id.ty == ty => Some(WatchEvent::Delete(r)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(_)) => Some(WatchEvent::Lagged),
                })
            })
            .boxed()
    }
}

// === impl State ===

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn next_uid(&mut self) -> String {
        self.uid += 1;
        format!("{:016x}", self.uid)
    }

    fn get(&self, id: &Id) -> Option<&Resource> {
        let resource = self.resources.get(&id.reference())?;
        if !id.uid.is_empty() && id.uid != resource.id.uid {
            return None;
        }
        Some(resource)
    }

    fn remove_cascade(&mut self, id: &Id, removed: &mut Vec<Resource>) {
        if self.get(id).is_none() {
            return;
        }
        let resource = match self.resources.remove(&id.reference()) {
            Some(resource) => resource,
            None => return,
        };

        let owned = self
            .resources
            .values()
            .filter(|r| is_owned_by(r, &resource.id))
            .map(|r| r.id.clone())
            .collect::<Vec<_>>();
        removed.push(resource);
        for id in owned {
            self.remove_cascade(&id, removed);
        }
    }
}

fn is_owned_by(resource: &Resource, owner: &Id) -> bool {
    match &resource.owner {
        Some(o) => {
            o.is_reference_of(&owner.reference()) && (o.uid.is_empty() || o.uid == owner.uid)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    fn workload(name: &str) -> Resource {
        let id = Id::new(Type::Workload, Tenancy::default(), name);
        Resource::new(id, &catalog::Workload::default()).unwrap()
    }

    #[tokio::test]
    async fn write_assigns_uid_and_versions() {
        let store = MemStore::new();
        let created = store.write(workload("api")).await.unwrap();
        assert!(!created.id.uid.is_empty());
        assert_eq!(created.version, created.generation);

        // An unchanged payload keeps its generation but gets a new version.
        let mut update = created.clone();
        update.id.uid.clear();
        update.version = 0;
        let updated = store.write(update).await.unwrap();
        assert_eq!(updated.id.uid, created.id.uid);
        assert_eq!(updated.generation, created.generation);
        assert!(updated.version > created.version);
    }

    #[tokio::test]
    async fn write_with_stale_version_conflicts() {
        let store = MemStore::new();
        let created = store.write(workload("api")).await.unwrap();
        store.write(created.clone()).await.unwrap();

        let err = store.write(created).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }), "{err}");
    }

    #[tokio::test]
    async fn read_with_old_uid_is_not_found() {
        let store = MemStore::new();
        let first = store.write(workload("api")).await.unwrap();
        store.delete(&first.id).await.unwrap();
        let second = store.write(workload("api")).await.unwrap();
        assert_ne!(first.id.uid, second.id.uid);

        assert!(store.read(&first.id).await.unwrap_err().is_not_found());
        assert_eq!(store.read(&second.id).await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_resources() {
        let store = MemStore::new();
        let owner = store.write(workload("api")).await.unwrap();
        let owned_id = owner.id.replace_type(Type::ProxyStateTemplate);
        let owned = Resource::new(owned_id.clone(), &crate::ProxyStateTemplate::default())
            .unwrap()
            .with_owner(owner.id.clone());
        store.write(owned).await.unwrap();

        let mut events = store.watch(Type::ProxyStateTemplate);
        store.delete(&owner.id).await.unwrap();

        assert!(store.read(&owned_id).await.unwrap_err().is_not_found());
        match events.next().await {
            Some(WatchEvent::Delete(r)) => assert_eq!(r.reference(), owned_id.reference()),
            ev => panic!("unexpected event: {ev:?}"),
        }
    }

    #[tokio::test]
    async fn list_filters_by_tenancy_and_prefix() {
        let store = MemStore::new();
        for name in ["api-1", "api-2", "web-1"] {
            store.write(workload(name)).await.unwrap();
        }
        let other = Id::new(Type::Workload, Tenancy::new("default", "other"), "api-3");
        store
            .write(Resource::new(other, &catalog::Workload::default()).unwrap())
            .await
            .unwrap();

        let names = |rs: Vec<Resource>| rs.into_iter().map(|r| r.id.name).collect::<Vec<_>>();

        let default_ns = store
            .list(Type::Workload, &Tenancy::default(), Some("api-"))
            .await
            .unwrap();
        assert_eq!(names(default_ns), vec!["api-1", "api-2"]);

        let all = store
            .list(Type::Workload, &Tenancy::partition_wide("default"), Some("api-"))
            .await
            .unwrap();
        assert_eq!(names(all), vec!["api-1", "api-2", "api-3"]);
    }

    #[tokio::test]
    async fn write_status_preserves_generation() {
        let store = MemStore::new();
        let created = store.write(workload("api")).await.unwrap();
        let status = Status {
            observed_generation: created.generation,
            conditions: vec![],
        };
        let updated = store
            .write_status(&created.id, "test", status.clone())
            .await
            .unwrap();
        assert_eq!(updated.generation, created.generation);
        assert_eq!(updated.status.get("test"), Some(&status));

        // Status survives a subsequent data write.
        let mut rewrite = updated.clone();
        rewrite.version = 0;
        let rewritten = store.write(rewrite).await.unwrap();
        assert_eq!(rewritten.status.get("test"), Some(&status));
    }

    #[tokio::test]
    async fn watch_only_sees_its_type() {
        let store = MemStore::new();
        let mut events = store.watch(Type::Service);
        store.write(workload("api")).await.unwrap();
        {
            let mut next = tokio_test::task::spawn(events.next());
            tokio_test::assert_pending!(next.poll());
        }

        let id = Id::new(Type::Service, Tenancy::default(), "api");
        let service = store
            .write(Resource::new(id, &catalog::Service::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(events.next().await, Some(WatchEvent::Upsert(service)));
    }

    #[tokio::test]
    async fn lagged_watchers_are_told_to_relist() {
        let store = MemStore::with_watch_capacity(1);
        let mut events = store.watch(Type::Workload);
        store.write(workload("a")).await.unwrap();
        store.write(workload("b")).await.unwrap();
        store.write(workload("c")).await.unwrap();

        assert_eq!(events.next().await, Some(WatchEvent::Lagged));
        match events.next().await {
            Some(WatchEvent::Upsert(r)) => {
                assert_eq!(r.reference(), Reference::new(Type::Workload, Tenancy::default(), "c"))
            }
            ev => panic!("unexpected event: {ev:?}"),
        }
    }
}
