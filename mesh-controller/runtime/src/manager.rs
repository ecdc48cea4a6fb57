//! Drives a [`Controller`]: every watched type is listed and then watched,
//! each change is mapped to reconcile requests, and a pool of workers
//! reconciles the queued requests.

use crate::{
    metrics::ControllerMetrics,
    queue::{Backoff, Outcome, Queue},
};
use anyhow::{bail, Context, Result};
use futures::prelude::*;
use mesh_controller_core::{
    controller::Watch, Controller, Reconcile, Request, Resource, SharedStore, Tenancy,
    WatchEvent, WatchStream,
};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinSet, time};
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub workers: usize,
    pub backoff: Backoff,
    pub reconcile_timeout: Duration,
}

pub struct Manager {
    store: SharedStore,
    config: ManagerConfig,
    metrics: ControllerMetrics,
    queue: Queue,
}

#[derive(Clone)]
struct Worker {
    queue: Queue,
    reconciler: Arc<dyn Reconcile>,
    metrics: ControllerMetrics,
    timeout: Duration,
}

// === impl ManagerConfig ===

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff: Backoff::default(),
            reconcile_timeout: Duration::from_secs(10),
        }
    }
}

// === impl Manager ===

impl Manager {
    pub fn new(store: SharedStore, config: ManagerConfig, metrics: ControllerMetrics) -> Self {
        let queue = Queue::new(config.backoff, metrics.queue_depth());
        Self {
            store,
            config,
            metrics,
            queue,
        }
    }

    /// Runs `controller` until `drain` is signaled.
    ///
    /// `ready` is set once every watched type has been listed and the
    /// resulting requests queued.
    pub async fn run(
        self,
        controller: Controller,
        ready: watch::Sender<bool>,
        drain: drain::Watch,
    ) -> Result<()> {
        let Self {
            store,
            config,
            metrics,
            queue,
        } = self;

        let reconciler = match controller.reconciler() {
            Some(reconciler) => reconciler.clone(),
            None => bail!("controller {} has no reconciler", controller.name()),
        };

        let mut tasks = JoinSet::new();

        // Subscribe to every type before listing so that no change made
        // after the list is missed.
        let mut watches = Vec::with_capacity(controller.watches().len());
        for watch in controller.watches() {
            let events = store.watch(watch.ty);
            let mut dispatch = Dispatch {
                store: store.clone(),
                watch: watch.clone(),
                queue: queue.clone(),
                metrics: metrics.clone(),
                backoff: config.backoff,
                retry: None,
                deadline: None,
                deletes: Vec::new(),
            };
            if let Err(error) = dispatch.relist().await {
                warn!(ty = %watch.ty.kind(), %error, "initial list failed; retrying");
                dispatch.failed();
            }
            watches.push((dispatch, events));
        }
        info!(controller = controller.name(), "initial list complete");
        let _ = ready.send(true);

        for (dispatch, events) in watches {
            let span = info_span!("watch", ty = %dispatch.watch.ty.kind());
            tasks.spawn(dispatch.run(events, drain.clone()).instrument(span));
        }

        let worker = Worker {
            queue: queue.clone(),
            reconciler,
            metrics,
            timeout: config.reconcile_timeout,
        };
        for _ in 0..config.workers.max(1) {
            tasks.spawn(worker.clone().run(drain.clone()));
        }

        let release = drain.signaled().await;
        debug!("shutting down");
        queue.close();
        release
            .release_after(async move { while tasks.join_next().await.is_some() {} })
            .await;
        Ok(())
    }
}

/// Feeds one watched type's changes through its mapper into the queue.
///
/// A failed mapping is retried by relisting the type after a backoff.
/// Deletions cannot be relisted, so failed ones are kept and mapped again.
struct Dispatch {
    store: SharedStore,
    watch: Watch,
    queue: Queue,
    metrics: ControllerMetrics,
    backoff: Backoff,
    /// The last relist backoff. Reset by a successful relist.
    retry: Option<Duration>,
    /// When the owed relist runs, if one is owed.
    deadline: Option<time::Instant>,
    deletes: Vec<Resource>,
}

// === impl Dispatch ===

impl Dispatch {
    async fn run(mut self, mut events: WatchStream, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);
        let resync = time::sleep_until(self.deadline.unwrap_or_else(time::Instant::now));
        tokio::pin!(resync);

        loop {
            let owed = self.deadline;
            let relisted = tokio::select! {
                _ = &mut shutdown => return,
                () = &mut resync, if owed.is_some() => {
                    debug!("retrying failed mappings");
                    self.deadline = None;
                    Some(self.resync().await)
                }
                event = events.next() => match event {
                    Some(WatchEvent::Upsert(resource)) => {
                        if let Err(error) = self.map(&resource, false).await {
                            warn!(%error, "mapping failed");
                            self.failed();
                        }
                        None
                    }
                    Some(WatchEvent::Delete(resource)) => {
                        if let Err(error) = self.map(&resource, true).await {
                            warn!(%error, "mapping failed");
                            self.deletes.push(resource);
                            self.failed();
                        }
                        None
                    }
                    Some(WatchEvent::Lagged) => {
                        warn!("watch lagged; relisting");
                        self.deadline = None;
                        Some(self.resync().await)
                    }
                    None => {
                        debug!("watch closed");
                        return;
                    }
                },
            };

            match relisted {
                Some(Ok(())) => self.retry = None,
                Some(Err(error)) => {
                    warn!(%error, "relist failed");
                    self.failed();
                }
                None => {}
            }
            if let Some(deadline) = self.deadline.filter(|d| owed != Some(*d)) {
                let delay = deadline.saturating_duration_since(time::Instant::now());
                debug!(?delay, "relist scheduled");
                resync.as_mut().reset(deadline);
            }
        }
    }

    /// Relists the type and maps every deletion that previously failed.
    async fn resync(&mut self) -> Result<()> {
        let mut result = self.relist().await;
        for resource in std::mem::take(&mut self.deletes) {
            if let Err(error) = self.map(&resource, true).await {
                self.deletes.push(resource);
                result = result.and(Err(error));
            }
        }
        result
    }

    /// Maps every resource of the type. Mapping continues past failures,
    /// and the first one is returned.
    async fn relist(&self) -> Result<()> {
        let resources = self
            .store
            .list(self.watch.ty, &Tenancy::wildcard(), None)
            .await?;
        debug!(ty = %self.watch.ty.kind(), resources = resources.len(), "listed");
        let mut result = Ok(());
        for resource in &resources {
            if let Err(error) = self.map(resource, false).await {
                result = result.and(Err(error));
            }
        }
        result
    }

    /// Owes a relist after the next backoff delay. A relist that is already
    /// owed keeps its deadline.
    fn failed(&mut self) {
        if self.deadline.is_none() {
            let delay = self.backoff.next(self.retry);
            self.retry = Some(delay);
            self.deadline = Some(time::Instant::now() + delay);
        }
    }

    async fn map(&self, resource: &Resource, deleted: bool) -> Result<()> {
        let requests = if deleted {
            self.watch.mapper.map_deleted(resource).await
        } else {
            self.watch.mapper.map(resource).await
        }
        .with_context(|| format!("mapping {}", resource.id))?;

        debug!(id = %resource.id, deleted, requests = requests.len(), "mapped");
        self.metrics.mapped(self.watch.ty, requests.len());
        for req in requests {
            self.queue.add(req);
        }
        Ok(())
    }
}

// === impl Worker ===

impl Worker {
    async fn run(self, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);
        loop {
            let req = tokio::select! {
                _ = &mut shutdown => return,
                req = self.queue.next() => match req {
                    Some(req) => req,
                    None => return,
                },
            };

            // An in-flight reconcile is dropped on shutdown.
            tokio::select! {
                _ = &mut shutdown => return,
                () = self.process(req) => {}
            }
        }
    }

    async fn process(&self, req: Request) {
        let span = info_span!("reconcile", id = %req.id);
        let start = time::Instant::now();
        let reconcile = AssertUnwindSafe(self.reconciler.reconcile(req.clone()))
            .catch_unwind()
            .instrument(span.clone());

        let outcome = match time::timeout(self.timeout, reconcile).await {
            Ok(Ok(Ok(()))) => Outcome::Success,
            Ok(Ok(Err(error))) => {
                span.in_scope(|| warn!(%error, "reconcile failed"));
                Outcome::Error
            }
            Ok(Err(_)) => {
                span.in_scope(|| warn!("reconcile panicked"));
                Outcome::Panic
            }
            Err(_) => {
                span.in_scope(|| warn!(timeout = ?self.timeout, "reconcile timed out"));
                Outcome::Timeout
            }
        };

        self.metrics.reconciled(outcome, start);
        self.queue.done(&req, outcome);
    }
}
