use crate::{Error, Id, Resource, Status, Tenancy, Type};
use futures::Stream;
use std::{pin::Pin, sync::Arc};

mod memory;

pub use self::memory::MemStore;

pub type SharedStore = Arc<dyn Store>;

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send + 'static>>;

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Upsert(Resource),

    /// Carries the last known state of the deleted resource.
    Delete(Resource),

    /// The watcher fell behind and events were dropped. Consumers must
    /// relist the watched type to recover.
    Lagged,
}

/// The versioned resource store the controller reads from and writes to.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Reads the current generation of a resource. An id with a uid only
    /// matches that generation.
    async fn read(&self, id: &Id) -> Result<Resource, Error>;

    /// Creates or updates a resource.
    ///
    /// A non-zero `version` must match the stored version. An empty uid
    /// refers to the current generation of an existing resource.
    async fn write(&self, resource: Resource) -> Result<Resource, Error>;

    /// Deletes a resource and everything it owns. Deleting a missing
    /// resource succeeds.
    async fn delete(&self, id: &Id) -> Result<(), Error>;

    async fn list(
        &self,
        ty: Type,
        tenancy: &Tenancy,
        name_prefix: Option<&str>,
    ) -> Result<Vec<Resource>, Error>;

    async fn write_status(&self, id: &Id, key: &str, status: Status) -> Result<Resource, Error>;

    /// Streams changes to resources of `ty` made after the call returns.
    fn watch(&self, ty: Type) -> WatchStream;
}
