//! Session Manager for smartmarks.
//!
//! Tracks the signed-in [`Identity`] and republishes it on a `watch` channel.
//! Every identity change observed here drives a collection reset and reload
//! in [`crate::app::App`]. Repeated notifications for the same identity are
//! swallowed so they do not trigger a redundant reload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::types::errors::AuthError;
use crate::types::session::{Identity, SignInFlow};
use crate::types::settings::AuthSettings;

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    auth: AuthSettings,
    current: watch::Sender<Option<Identity>>,
    loading: AtomicBool,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, auth: AuthSettings) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            backend,
            auth,
            current,
            loading: AtomicBool::new(true),
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    /// Receiver that fires on every distinct identity change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    /// True until the first [`SessionManager::resolve`] has finished.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Asks the backend for a session left over from an earlier run.
    ///
    /// A failure leaves the manager signed out.
    pub async fn resolve(&self) -> Result<Option<Identity>, AuthError> {
        let result = self.backend.get_current_session().await;
        self.loading.store(false, Ordering::Release);
        match result {
            Ok(identity) => {
                self.apply(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "could not resolve prior session");
                self.apply(None);
                Err(AuthError::Resolve(e))
            }
        }
    }

    /// Starts the configured sign-in flow. The identity arrives later as a change.
    pub async fn login(&self) -> Result<SignInFlow, AuthError> {
        let flow = self
            .backend
            .sign_in(&self.auth.provider, &self.auth.redirect_to)
            .await
            .map_err(|e| {
                warn!(error = %e, provider = %self.auth.provider, "sign-in failed");
                AuthError::SignIn(e)
            })?;
        info!(provider = %self.auth.provider, ?flow, "sign-in started");
        Ok(flow)
    }

    /// Finishes a redirect sign-in with the code from the callback URL.
    pub async fn complete_login(&self, code: &str) -> Result<Identity, AuthError> {
        let identity = self.backend.complete_sign_in(code).await.map_err(|e| {
            warn!(error = %e, "sign-in completion failed");
            AuthError::SignIn(e)
        })?;
        self.apply(Some(identity.clone()));
        Ok(identity)
    }

    /// Signs out. If the backend refuses, the current identity is kept.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.backend.sign_out().await.map_err(|e| {
            warn!(error = %e, "sign-out failed");
            AuthError::SignOut(e)
        })?;
        self.apply(None);
        Ok(())
    }

    /// Publishes `identity`. Returns whether it differs from the current one.
    pub fn apply(&self, identity: Option<Identity>) -> bool {
        let changed = self.current.send_if_modified(|current| {
            if *current == identity {
                return false;
            }
            *current = identity.clone();
            true
        });
        if changed {
            info!(user = ?identity.as_ref().map(|i| i.user_id.as_str()), "identity changed");
        } else {
            debug!("identity unchanged; notification skipped");
        }
        changed
    }

    /// Forwards the backend's session notifications into this manager until
    /// the backend drops its sender or the task is aborted.
    pub fn watch_backend(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.backend.session_changes();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                manager.apply(identity);
            }
            debug!("backend session channel closed");
        })
    }
}
