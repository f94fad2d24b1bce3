//! App Core for smartmarks.
//!
//! Root context owning the session manager, the identity-scoped bookmark
//! store, the mutation pipeline and event ingestion. Every identity change
//! resets the store, reopens the change feed and reloads the list.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{self, Backend};
use crate::database::connection::Database;
use crate::managers::bookmark_store::{BookmarkStore, Scope};
use crate::managers::event_ingestion::EventIngestion;
use crate::managers::mutation_pipeline::{AddOutcome, DeleteOutcome, MutationPipeline};
use crate::managers::session_manager::SessionManager;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::types::bookmark::Bookmark;
use crate::types::errors::{AppError, AuthError, PipelineError, SettingsError};
use crate::types::event::Notification;
use crate::types::session::{Identity, SignInFlow};
use crate::types::settings::AppSettings;

const NOTIFICATION_CAPACITY: usize = 64;

pub struct App {
    settings: Mutex<SettingsEngine>,
    backend: Arc<dyn Backend>,
    store: Arc<BookmarkStore>,
    session: Arc<SessionManager>,
    pipeline: MutationPipeline,
    ingestion: EventIngestion,
    notifications: broadcast::Sender<Notification>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Builds the app from loaded settings: opens the database and the
    /// configured backend.
    pub fn open(settings: SettingsEngine) -> Result<Arc<Self>, AppError> {
        let db_path = settings.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Database(format!("{}: {}", parent.display(), e)))?;
        }
        let db = Arc::new(Database::open(&db_path).map_err(|e| AppError::Database(e.to_string()))?);
        let backend = backend::from_settings(settings.get_settings(), db)?;
        info!(db = %db_path.display(), kind = ?settings.get_settings().backend.kind, "backend ready");
        Ok(Self::with_backend(backend, settings))
    }

    /// Builds the app around an existing backend.
    pub fn with_backend(backend: Arc<dyn Backend>, settings: SettingsEngine) -> Arc<Self> {
        let current = settings.get_settings().clone();
        let store = Arc::new(BookmarkStore::new());
        let session = Arc::new(SessionManager::new(Arc::clone(&backend), current.auth));
        let pipeline = MutationPipeline::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            current.pipeline.rollback_failed_deletes,
        );
        let ingestion = EventIngestion::new(Arc::clone(&store));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Arc::new(Self {
            settings: Mutex::new(settings),
            backend,
            store,
            session,
            pipeline,
            ingestion,
            notifications,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Resolves any prior session, loads its bookmarks and starts following
    /// identity changes.
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.session.resolve().await {
            self.notify(Notification::warning(e.to_string()));
        }

        let mut identities = self.session.subscribe();
        let watcher = self.session.watch_backend();
        self.on_identity_changed(self.session.current()).await;

        let app = Arc::downgrade(self);
        let follower = tokio::spawn(async move {
            while identities.changed().await.is_ok() {
                let identity = identities.borrow_and_update().clone();
                let Some(app) = Weak::upgrade(&app) else { break };
                // Resets happen in order; a slow load must not delay the next one.
                let scope = app.begin_scope(identity);
                tokio::spawn(async move { app.populate(scope).await });
            }
        });

        self.tasks.lock().extend([watcher, follower]);
        info!(signed_in = self.session.current().is_some(), "app started");
    }

    /// Resets the store for `identity` and repopulates it.
    ///
    /// Failures are reported as notifications; the store is left empty.
    pub async fn on_identity_changed(&self, identity: Option<Identity>) {
        let scope = self.begin_scope(identity);
        self.populate(scope).await;
    }

    /// Starts a new, empty generation and releases the change feed.
    fn begin_scope(&self, identity: Option<Identity>) -> Scope {
        self.ingestion.rescope(identity)
    }

    /// Subscribes, fetches, then merges what arrived meanwhile.
    async fn populate(&self, scope: Scope) {
        let Some(owner) = scope.owner_id().map(str::to_owned) else {
            return;
        };

        let subscription = match self.ingestion.subscribe(self.backend.as_ref(), &scope).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "change feed unavailable; list will not update live");
                self.notify(Notification::warning(format!("Live updates unavailable: {}", e.user_message())));
                None
            }
        };

        let records = match self.backend.list_bookmarks(&owner).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "initial bookmark fetch failed");
                self.notify(Notification::error(e.user_message()));
                return;
            }
        };

        match self.store.replace_all(&scope, records) {
            Some(count) => info!(count, generation = scope.generation, "bookmarks loaded"),
            None => {
                debug!(generation = scope.generation, "discarding fetch for previous identity");
                return;
            }
        }

        if let Some(subscription) = subscription {
            self.ingestion.start(scope, subscription);
        }
    }

    /// Full reload for the current identity.
    pub async fn reload(&self) {
        self.on_identity_changed(self.store.identity()).await;
    }

    pub async fn login(&self) -> Result<SignInFlow, AuthError> {
        self.session.login().await.inspect_err(|e| {
            self.notify(Notification::error(e.to_string()));
        })
    }

    pub async fn complete_login(&self, code: &str) -> Result<Identity, AuthError> {
        self.session.complete_login(code).await.inspect_err(|e| {
            self.notify(Notification::error(e.to_string()));
        })
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.session.logout().await.inspect_err(|e| {
            self.notify(Notification::error(e.to_string()));
        })
    }

    /// Adds a bookmark. A backend rejection is also broadcast as a notification.
    pub async fn add_bookmark(&self, title: &str, url: &str) -> Result<AddOutcome, PipelineError> {
        self.pipeline.add(title, url).await.inspect_err(|e| {
            if let PipelineError::Submission { message, .. } = e {
                self.notify(Notification::error(message.clone()));
            }
        })
    }

    pub async fn delete_bookmark(&self, id: &str) -> Result<DeleteOutcome, PipelineError> {
        self.pipeline.delete(id).await.inspect_err(|e| {
            self.notify(Notification::error(e.to_string()));
        })
    }

    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.store.snapshot()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.current()
    }

    pub fn is_loading(&self) -> bool {
        self.session.is_loading()
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn pipeline(&self) -> &MutationPipeline {
        &self.pipeline
    }

    pub fn ingestion(&self) -> &EventIngestion {
        &self.ingestion
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    /// Fires whenever the visible bookmark list changes.
    pub fn subscribe_bookmarks(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.lock().get_settings().clone()
    }

    pub fn config_path(&self) -> PathBuf {
        self.settings.lock().get_config_path().to_path_buf()
    }

    /// Persists one setting. Backend and pipeline changes apply on next start.
    pub fn set_setting(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.settings.lock().set_value(key, value)
    }

    fn notify(&self, notification: Notification) {
        // No UI attached is fine.
        let _ = self.notifications.send(notification);
    }

    /// Stops background tasks and releases the change feed.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.ingestion.detach();
        info!("app shut down");
    }
}

