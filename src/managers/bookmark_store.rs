//! Identity-scoped bookmark state shared by every flow.
//!
//! Each identity change starts a new generation. Async flows capture a
//! [`Scope`] before awaiting the backend and hand it back when applying the
//! result; a scope from an older generation is rejected, so results fetched
//! for a previous identity can never reach the current collection.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::managers::bookmark_collection::BookmarkCollection;
use crate::types::bookmark::Bookmark;
use crate::types::session::Identity;

/// The identity generation a flow started under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub generation: u64,
    pub owner: Option<Identity>,
}

impl Scope {
    pub fn owner_id(&self) -> Option<&str> {
        self.owner.as_ref().map(|i| i.user_id.as_str())
    }
}

/// Why a merge left the collection untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Insert of an id that is already present.
    AlreadyPresent,
    /// Remove of an id that is not present.
    NotPresent,
    /// The scope belongs to an earlier identity generation.
    StaleScope,
    /// The record belongs to a different user than the scope.
    ForeignOwner,
    /// An event kind that is not merged.
    Ignored,
}

/// Result of merging one change into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Inserted,
    Removed(Bookmark),
    Skipped(SkipReason),
}

impl MergeResult {
    pub fn changed(&self) -> bool {
        !matches!(self, MergeResult::Skipped(_))
    }
}

struct StoreState {
    scope: Scope,
    collection: BookmarkCollection,
    revision: u64,
}

/// Holds the current scope and its collection behind one short-lived lock.
pub struct BookmarkStore {
    state: Mutex<StoreState>,
    revisions: watch::Sender<u64>,
}

impl Default for BookmarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookmarkStore {
    pub fn new() -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            state: Mutex::new(StoreState {
                scope: Scope {
                    generation: 0,
                    owner: None,
                },
                collection: BookmarkCollection::new(),
                revision: 0,
            }),
            revisions,
        }
    }

    pub fn scope(&self) -> Scope {
        self.state.lock().scope.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().scope.owner.clone()
    }

    pub fn is_current(&self, scope: &Scope) -> bool {
        self.state.lock().scope.generation == scope.generation
    }

    /// Starts a new generation for `identity` with an empty collection.
    pub fn reset(&self, identity: Option<Identity>) -> Scope {
        let scope = {
            let mut state = self.state.lock();
            state.scope = Scope {
                generation: state.scope.generation + 1,
                owner: identity,
            };
            state.collection.clear();
            state.revision += 1;
            state.scope.clone()
        };
        debug!(generation = scope.generation, owner = ?scope.owner_id(), "store reset");
        self.publish();
        scope
    }

    /// Full reload. Records owned by anyone else are dropped.
    /// Returns the new length, or `None` when `scope` is stale.
    pub fn replace_all(&self, scope: &Scope, records: Vec<Bookmark>) -> Option<usize> {
        let len = {
            let mut state = self.state.lock();
            if state.scope.generation != scope.generation {
                return None;
            }
            let owner = state.scope.owner_id().map(str::to_owned);
            let (mine, foreign): (Vec<_>, Vec<_>) = records
                .into_iter()
                .partition(|r| Some(r.owner.as_str()) == owner.as_deref());
            if !foreign.is_empty() {
                debug!(count = foreign.len(), "dropped records for another owner");
            }
            state.collection.replace_all(mine);
            state.revision += 1;
            state.collection.len()
        };
        self.publish();
        Some(len)
    }

    pub fn insert_front(&self, scope: &Scope, record: Bookmark) -> MergeResult {
        let owner = record.owner.clone();
        self.merge(scope, |c| {
            if c.insert_front(record) {
                MergeResult::Inserted
            } else {
                MergeResult::Skipped(SkipReason::AlreadyPresent)
            }
        }, Some(owner))
    }

    /// Used to restore a record at its chronological position.
    pub fn insert_sorted(&self, scope: &Scope, record: Bookmark) -> MergeResult {
        let owner = record.owner.clone();
        self.merge(scope, |c| {
            if c.insert_sorted(record) {
                MergeResult::Inserted
            } else {
                MergeResult::Skipped(SkipReason::AlreadyPresent)
            }
        }, Some(owner))
    }

    pub fn remove_by_id(&self, scope: &Scope, id: &str) -> MergeResult {
        self.merge(scope, |c| match c.remove_by_id(id) {
            Some(record) => MergeResult::Removed(record),
            None => MergeResult::Skipped(SkipReason::NotPresent),
        }, None)
    }

    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.state.lock().collection.snapshot().to_vec()
    }

    pub fn len(&self) -> usize {
        self.state.lock().collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision counter bumped on every visible change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    fn merge<F>(&self, scope: &Scope, apply: F, owner: Option<String>) -> MergeResult
    where
        F: FnOnce(&mut BookmarkCollection) -> MergeResult,
    {
        let result = {
            let mut state = self.state.lock();
            if state.scope.generation != scope.generation {
                return MergeResult::Skipped(SkipReason::StaleScope);
            }
            if let Some(owner) = owner {
                if state.scope.owner_id() != Some(owner.as_str()) {
                    return MergeResult::Skipped(SkipReason::ForeignOwner);
                }
            }
            let result = apply(&mut state.collection);
            if result.changed() {
                state.revision += 1;
            }
            result
        };
        if result.changed() {
            self.publish();
        }
        result
    }

    fn publish(&self) {
        let revision = self.state.lock().revision;
        self.revisions.send_replace(revision);
    }
}
