//! Mutation Pipeline for smartmarks.
//!
//! Adds go through `Idle -> Normalizing -> Submitting -> Idle` and only ever
//! insert the record the backend confirmed. Deletes remove the bookmark
//! locally first, then ask the backend; a rejected delete is optionally
//! rolled back to its chronological position.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::managers::bookmark_store::{BookmarkStore, MergeResult, SkipReason};
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::PipelineError;

/// Where the add flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddState {
    Idle,
    Normalizing,
    Submitting,
}

/// Why a request was dropped before reaching the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyTitle,
    EmptyUrl,
    NoIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored and shown. The caller clears its input fields.
    Committed(Bookmark),
    /// Nothing was submitted.
    Rejected(RejectReason),
    /// The backend stored it, but the identity changed while it was in flight.
    Discarded(Bookmark),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The backend confirmed. Carries the record removed locally, if it was shown.
    Confirmed(Option<Bookmark>),
    Rejected(RejectReason),
}

/// Prepends `https://` unless the URL already starts with `http://` or
/// `https://` in any letter case. Nothing else is checked.
pub fn normalize_url(url: &str) -> String {
    if has_http_scheme(url) {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn has_http_scheme(url: &str) -> bool {
    let bytes = url.as_bytes();
    let starts_with = |prefix: &str| {
        bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    };
    starts_with("http://") || starts_with("https://")
}

pub struct MutationPipeline {
    backend: Arc<dyn Backend>,
    store: Arc<BookmarkStore>,
    rollback_failed_deletes: bool,
    add_state: Mutex<AddState>,
}

/// Returns the add flow to `Idle` however the submission ends, including
/// when the caller's future is dropped mid-await.
struct AddGuard<'a>(&'a Mutex<AddState>);

impl AddGuard<'_> {
    fn advance(&self, next: AddState) {
        *self.0.lock() = next;
    }
}

impl Drop for AddGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = AddState::Idle;
    }
}

impl MutationPipeline {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<BookmarkStore>, rollback_failed_deletes: bool) -> Self {
        Self {
            backend,
            store,
            rollback_failed_deletes,
            add_state: Mutex::new(AddState::Idle),
        }
    }

    pub fn add_state(&self) -> AddState {
        *self.add_state.lock()
    }

    /// Submits a new bookmark for the current identity.
    ///
    /// Blank input or a signed-out state is a silent [`AddOutcome::Rejected`].
    /// Input is submitted as entered; only the URL scheme is filled in.
    /// A second add while one is in flight fails with
    /// [`PipelineError::SubmissionInFlight`]. A backend failure leaves the
    /// collection unchanged and carries the backend's message.
    pub async fn add(&self, title: &str, url: &str) -> Result<AddOutcome, PipelineError> {
        if title.trim().is_empty() {
            return Ok(AddOutcome::Rejected(RejectReason::EmptyTitle));
        }
        if url.trim().is_empty() {
            return Ok(AddOutcome::Rejected(RejectReason::EmptyUrl));
        }
        let scope = self.store.scope();
        let Some(owner) = scope.owner_id().map(str::to_owned) else {
            return Ok(AddOutcome::Rejected(RejectReason::NoIdentity));
        };

        let guard = self.begin_add()?;
        let new = NewBookmark {
            title: title.to_string(),
            url: normalize_url(url),
            owner,
        };
        guard.advance(AddState::Submitting);
        debug!(url = %new.url, "submitting bookmark");

        let record = match self.backend.create_bookmark(new).await {
            Ok(record) => record,
            Err(source) => {
                warn!(error = %source, "bookmark submission failed");
                return Err(PipelineError::Submission {
                    message: source.user_message(),
                    source,
                });
            }
        };
        drop(guard);

        match self.store.insert_front(&scope, record.clone()) {
            MergeResult::Inserted => {
                info!(id = %record.id, "bookmark committed");
                Ok(AddOutcome::Committed(record))
            }
            MergeResult::Skipped(SkipReason::AlreadyPresent) => {
                debug!(id = %record.id, "push echo arrived first");
                Ok(AddOutcome::Committed(record))
            }
            MergeResult::Skipped(reason) => {
                debug!(id = %record.id, ?reason, "discarding add result");
                Ok(AddOutcome::Discarded(record))
            }
            MergeResult::Removed(_) => Ok(AddOutcome::Committed(record)),
        }
    }

    fn begin_add(&self) -> Result<AddGuard<'_>, PipelineError> {
        let mut state = self.add_state.lock();
        if *state != AddState::Idle {
            debug!(state = ?*state, "add refused; submission in flight");
            return Err(PipelineError::SubmissionInFlight);
        }
        *state = AddState::Normalizing;
        Ok(AddGuard(&self.add_state))
    }

    /// Removes `id` locally, then asks the backend to delete it.
    ///
    /// The local removal is visible before the backend answers. On failure
    /// the record is restored when rollback is enabled, the identity is
    /// unchanged and no other copy has appeared meanwhile.
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome, PipelineError> {
        let scope = self.store.scope();
        if scope.owner.is_none() {
            return Ok(DeleteOutcome::Rejected(RejectReason::NoIdentity));
        }

        let removed = match self.store.remove_by_id(&scope, id) {
            MergeResult::Removed(record) => Some(record),
            _ => None,
        };

        match self.backend.delete_bookmark(id).await {
            Ok(()) => {
                info!(%id, "bookmark deleted");
                Ok(DeleteOutcome::Confirmed(removed))
            }
            Err(source) => {
                let rolled_back = match removed {
                    Some(record) if self.rollback_failed_deletes => {
                        self.store.insert_sorted(&scope, record) == MergeResult::Inserted
                    }
                    _ => false,
                };
                warn!(%id, error = %source, rolled_back, "bookmark deletion failed");
                Err(PipelineError::Deletion {
                    id: id.to_string(),
                    rolled_back,
                    source,
                })
            }
        }
    }
}
