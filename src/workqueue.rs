// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! A de-duplicating, rate-limited work queue shared by all workers.
//!
//! # Guarantees
//!
//! - An item queued several times before a worker takes it is processed once.
//! - No two workers hold the same item at the same time. An item added while it is being
//!   processed is parked and re-queued when the worker calls [`WorkQueue::done`].
//! - After [`WorkQueue::shut_down`], new items are ignored and [`WorkQueue::get`] returns
//!   `None` once the queue has drained.

use crate::reconcilers::retry::{default_backoff, ExponentialBackoff, ItemRateLimiter};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// The three kinds of work the controller does.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkItem {
    /// Reconcile the named `Binding`.
    Binding(String),
    /// Re-digest the named `CustomTransform`.
    Transform(String),
    /// Recollect the properties of the named inventory entry.
    Properties(String),
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binding(name) => write!(f, "Binding {name}"),
            Self::Transform(name) => write!(f, "CustomTransform {name}"),
            Self::Properties(name) => write!(f, "properties of {name}"),
        }
    }
}

/// Callback used by caches to re-enqueue a Binding by name.
pub type BindingEnqueuer = Arc<dyn Fn(String) + Send + Sync>;

/// Builds a [`BindingEnqueuer`] that adds [`WorkItem::Binding`] items to `queue`.
#[must_use]
pub fn binding_enqueuer(queue: &Arc<WorkQueue<WorkItem>>) -> BindingEnqueuer {
    let queue = Arc::clone(queue);
    Arc::new(move |name| queue.add(WorkItem::Binding(name)))
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
    limiter: ItemRateLimiter<T>,
}

/// Work queue with client-go semantics.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_backoff(default_backoff())
    }

    #[must_use]
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                limiter: ItemRateLimiter::new(backoff),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `item` as needing processing.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(?item, "Item is being processed, parking it");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `item` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Adds `item` after its per-item backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.lock().limiter.when(&item);
        trace!(?item, ?delay, "Re-queueing item with backoff");
        self.add_after(item, delay);
    }

    /// Resets the backoff of `item`.
    pub fn forget(&self, item: &T) {
        self.lock().limiter.forget(item);
    }

    /// Number of rate-limited re-queues of `item` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().limiter.num_requeues(item)
    }

    /// Waits for the next item. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks the processing of `item` as finished.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops accepting items and wakes every waiting worker.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of items waiting to be processed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "workqueue_tests.rs"]
mod workqueue_tests;
