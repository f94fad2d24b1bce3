//! Backend Service contract.
//!
//! Identity, persistence and push notifications all live behind [`Backend`].
//! Two implementations ship with the crate: [`local::LocalBackend`]
//! (SQLite + in-process fan-out) and, with the `rest` feature,
//! [`rest::RestBackend`] (hosted HTTP API).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::BackendError;
use crate::types::event::ChangeEvent;
use crate::types::session::{Identity, SignInFlow};
use crate::types::settings::{AppSettings, BackendKind};

pub mod local;
#[cfg(feature = "rest")]
pub mod rest;

/// Buffered events per subscription before the producer waits.
pub const CHANGE_BUFFER: usize = 256;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolves a session left over from an earlier run, if any.
    async fn get_current_session(&self) -> Result<Option<Identity>, BackendError>;

    /// Delivers the identity on every session change. Dropping the receiver unsubscribes.
    fn session_changes(&self) -> watch::Receiver<Option<Identity>>;

    /// Starts sign-in. The resulting identity arrives through [`Backend::session_changes`].
    async fn sign_in(&self, provider: &str, redirect_to: &str) -> Result<SignInFlow, BackendError>;

    /// Finishes a redirect sign-in with the code handed back to `redirect_to`.
    async fn complete_sign_in(&self, code: &str) -> Result<Identity, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// All bookmarks of `owner`, newest first.
    async fn list_bookmarks(&self, owner: &str) -> Result<Vec<Bookmark>, BackendError>;

    /// Creates a bookmark and returns it with server-assigned `id` and `created_at`.
    async fn create_bookmark(&self, new: NewBookmark) -> Result<Bookmark, BackendError>;

    async fn delete_bookmark(&self, id: &str) -> Result<(), BackendError>;

    /// Opens the change stream for `owner`.
    async fn subscribe_to_changes(&self, owner: &str) -> Result<ChangeSubscription, BackendError>;
}

/// A live change stream. Releasing or dropping it stops delivery.
pub struct ChangeSubscription {
    owner: String,
    events: mpsc::Receiver<ChangeEvent>,
    producer: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    /// Wraps a receiver fed by `producer`; the task is aborted on release.
    pub fn new(owner: impl Into<String>, events: mpsc::Receiver<ChangeEvent>, producer: JoinHandle<()>) -> Self {
        Self {
            owner: owner.into(),
            events,
            producer: Some(producer),
        }
    }

    /// A subscription without a background producer; the sender side drives it.
    pub fn from_channel(owner: impl Into<String>, events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            owner: owner.into(),
            events,
            producer: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll used to drain events buffered during a reload.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }

    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.events.close();
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds the backend selected by `settings`.
pub fn from_settings(settings: &AppSettings, db: Arc<crate::database::Database>) -> Result<Arc<dyn Backend>, BackendError> {
    match settings.backend.kind {
        BackendKind::Local => Ok(Arc::new(local::LocalBackend::new(db, &settings.backend.local_user)?)),
        #[cfg(feature = "rest")]
        BackendKind::Rest => Ok(Arc::new(rest::RestBackend::new(&settings.backend, db)?)),
        #[cfg(not(feature = "rest"))]
        BackendKind::Rest => Err(BackendError::Network(
            "hosted backend support was not compiled in (enable the `rest` feature)".to_string(),
        )),
    }
}
