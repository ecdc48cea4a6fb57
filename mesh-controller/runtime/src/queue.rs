//! A deduplicating work queue with per-key exponential backoff.
//!
//! A request is either pending, in flight, or neither. Adding a pending
//! request is a no-op; adding an in-flight request marks it dirty so that it
//! is queued again as soon as its current run completes. At most one worker
//! processes a given request at a time.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::Request;
use parking_lot::Mutex;
use prometheus_client::metrics::gauge::Gauge;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::Notify, time};

#[derive(Clone, Debug)]
pub struct Queue {
    inner: Arc<Inner>,
}

/// Bounds for the delay before a failed request is retried.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

/// How a worker's run of a request ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Panic,
    Timeout,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: Backoff,
    depth: Gauge,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Request>,
    queued: HashSet<Request>,
    in_flight: HashSet<Request>,
    dirty: HashSet<Request>,
    delays: HashMap<Request, Duration>,
    closed: bool,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(5),
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Doubles the previous delay, starting at `min` and never exceeding `max`.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        match prev {
            None => self.min.min(self.max),
            Some(prev) => prev.saturating_mul(2).clamp(self.min, self.max.max(self.min)),
        }
    }
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Panic => "panic",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

// === impl Queue ===

impl Queue {
    pub fn new(backoff: Backoff, depth: Gauge) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff,
                depth,
            }),
        }
    }

    /// Queues a request unless it is already pending.
    pub fn add(&self, req: Request) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        if state.in_flight.contains(&req) {
            tracing::trace!(%req, "request in flight; marking dirty");
            state.dirty.insert(req);
            return;
        }
        if state.queued.insert(req.clone()) {
            state.pending.push_back(req);
            self.inner.depth.set(state.pending.len() as i64);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Queues a request once `delay` has elapsed.
    pub fn add_after(&self, req: Request, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add(req);
        });
    }

    /// Waits for the next pending request and marks it in flight. Returns
    /// `None` once the queue is closed.
    pub async fn next(&self) -> Option<Request> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(req) = state.pending.pop_front() {
                    state.queued.remove(&req);
                    state.in_flight.insert(req.clone());
                    self.inner.depth.set(state.pending.len() as i64);
                    return Some(req);
                }
            }

            notified.await;
        }
    }

    /// Releases an in-flight request.
    ///
    /// Failures are retried after the key's next backoff delay; success
    /// resets it. A request that was re-added while in flight is queued
    /// immediately either way.
    pub fn done(&self, req: &Request, outcome: Outcome) {
        let mut state = self.inner.state.lock();
        state.in_flight.remove(req);
        let retry = if outcome.is_success() {
            state.delays.remove(req);
            None
        } else {
            let delay = self.inner.backoff.next(state.delays.get(req).copied());
            state.delays.insert(req.clone(), delay);
            Some(delay)
        };
        let dirty = state.dirty.remove(req);
        drop(state);

        if dirty {
            self.add(req.clone());
        } else if let Some(delay) = retry {
            tracing::debug!(%req, ?delay, "requeueing after failure");
            self.add_after(req.clone(), delay);
        }
    }

    /// Stops handing out requests and wakes every waiting worker.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// The number of pending requests, not counting those in flight.
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The delay that will precede the next retry of `req`, if it has failed
    /// since it last succeeded.
    pub fn backoff_of(&self, req: &Request) -> Option<Duration> {
        self.inner.state.lock().delays.get(req).copied()
    }
}
