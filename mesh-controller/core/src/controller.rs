use crate::{Id, Resource, Type};
use anyhow::Result;
use std::{fmt, sync::Arc};

/// Asks the runtime to reconcile one resource of the controller's managed type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Request {
    pub id: Id,
}

/// Turns a change to a watched resource into the reconcile requests it
/// affects.
///
/// Mappers may update their own caches as a side effect and must be safe to
/// call concurrently for different resources.
#[async_trait::async_trait]
pub trait MapResource: Send + Sync + 'static {
    async fn map(&self, resource: &Resource) -> Result<Vec<Request>>;

    /// Called with the last known state of a deleted resource.
    async fn map_deleted(&self, resource: &Resource) -> Result<Vec<Request>> {
        self.map(resource).await
    }
}

#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, req: Request) -> Result<()>;
}

/// Everything the runtime needs to drive one controller: the type it
/// manages, the types it watches and how their changes map to requests.
#[derive(Clone)]
pub struct Controller {
    name: &'static str,
    managed_type: Type,
    watches: Vec<Watch>,
    reconciler: Option<Arc<dyn Reconcile>>,
}

#[derive(Clone)]
pub struct Watch {
    pub ty: Type,
    pub mapper: Arc<dyn MapResource>,
}

// === impl Request ===

impl Request {
    pub fn new(id: Id) -> Self {
        Self { id }
    }
}

impl From<Id> for Request {
    fn from(id: Id) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

// === impl Controller ===

impl Controller {
    pub fn new(name: &'static str, managed_type: Type) -> Self {
        Self {
            name,
            managed_type,
            watches: Vec::new(),
            reconciler: None,
        }
    }

    pub fn with_watch(mut self, ty: Type, mapper: Arc<dyn MapResource>) -> Self {
        self.watches.push(Watch { ty, mapper });
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconcile>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn managed_type(&self) -> Type {
        self.managed_type
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn reconciler(&self) -> Option<&Arc<dyn Reconcile>> {
        self.reconciler.as_ref()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("managed_type", &self.managed_type)
            .field(
                "watches",
                &self.watches.iter().map(|w| w.ty).collect::<Vec<_>>(),
            )
            .field("reconciler", &self.reconciler.is_some())
            .finish()
    }
}
