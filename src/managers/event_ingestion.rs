//! Event Ingestion for smartmarks.
//!
//! Owns at most one live change subscription, bound to the identity
//! generation it was opened for, and merges its events into the
//! [`BookmarkStore`]. Subscriptions are opened before the initial fetch so
//! that events raised during the fetch wait in the channel; they are drained
//! once the fetched list is in place.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::backend::{Backend, ChangeSubscription};
use crate::managers::bookmark_store::{BookmarkStore, MergeResult, Scope, SkipReason};
use crate::types::errors::BackendError;
use crate::types::event::ChangeEvent;
use crate::types::session::Identity;

/// Merges one pushed event. Whether the event echoes a local mutation does
/// not matter: both merges are idempotent.
pub fn apply_event(store: &BookmarkStore, scope: &Scope, event: ChangeEvent) -> MergeResult {
    let result = match event {
        ChangeEvent::Created { record } => store.insert_front(scope, record),
        ChangeEvent::Deleted { id } => store.remove_by_id(scope, &id),
        ChangeEvent::Updated { record } => {
            trace!(id = %record.id, "ignoring update event");
            return MergeResult::Skipped(SkipReason::Ignored);
        }
    };
    trace!(?result, "event merged");
    result
}

struct Feed {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct EventIngestion {
    store: Arc<BookmarkStore>,
    active: Mutex<Option<Feed>>,
}

impl EventIngestion {
    pub fn new(store: Arc<BookmarkStore>) -> Self {
        Self {
            store,
            active: Mutex::new(None),
        }
    }

    /// Stops the live feed, if any. Dropping the task's subscription releases it.
    pub fn detach(&self) {
        if let Some(feed) = self.active.lock().take() {
            debug!(generation = feed.generation, "change feed released");
            feed.task.abort();
        }
    }

    /// Moves the store to a new generation for `identity`, then stops the
    /// live feed.
    ///
    /// The generation is bumped first: a `start` racing with this call either
    /// lands before the bump and is stopped here, or after it and is refused.
    pub fn rescope(&self, identity: Option<Identity>) -> Scope {
        let scope = self.store.reset(identity);
        self.detach();
        scope
    }

    /// Releases a feed from an earlier generation, then opens a subscription
    /// for `scope`'s owner. Nothing is merged until [`EventIngestion::start`].
    pub async fn subscribe(&self, backend: &dyn Backend, scope: &Scope) -> Result<Option<ChangeSubscription>, BackendError> {
        self.release_older_than(scope.generation);
        let Some(owner) = scope.owner_id() else {
            return Ok(None);
        };
        let subscription = backend.subscribe_to_changes(owner).await?;
        Ok(Some(subscription))
    }

    fn release_older_than(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|feed| feed.generation < generation) {
            if let Some(feed) = active.take() {
                debug!(generation = feed.generation, "superseded change feed released");
                feed.task.abort();
            }
        }
    }

    /// Applies every event already buffered in `subscription`.
    pub fn drain(&self, scope: &Scope, subscription: &mut ChangeSubscription) -> usize {
        let mut applied = 0;
        while let Some(event) = subscription.try_recv() {
            if apply_event(&self.store, scope, event).changed() {
                applied += 1;
            }
        }
        if applied > 0 {
            debug!(applied, "buffered events merged after load");
        }
        applied
    }

    /// Drains what is buffered and keeps merging in the background.
    ///
    /// Returns `false` and releases the subscription when `scope` is no
    /// longer current.
    pub fn start(&self, scope: Scope, mut subscription: ChangeSubscription) -> bool {
        let mut active = self.active.lock();
        if !self.store.is_current(&scope) {
            debug!(generation = scope.generation, "stale feed not started");
            subscription.release();
            return false;
        }
        self.drain(&scope, &mut subscription);

        let store = Arc::clone(&self.store);
        let generation = scope.generation;
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if !store.is_current(&scope) {
                    break;
                }
                if let MergeResult::Skipped(SkipReason::StaleScope) = apply_event(&store, &scope, event) {
                    break;
                }
            }
            debug!(generation = scope.generation, "change feed ended");
            subscription.release();
        });

        if let Some(previous) = active.replace(Feed { generation, task }) {
            previous.task.abort();
        }
        debug!(generation, "change feed started");
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|feed| !feed.task.is_finished())
    }
}

impl Drop for EventIngestion {
    fn drop(&mut self) {
        self.detach();
    }
}
