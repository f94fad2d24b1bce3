//! Hosted backend for smartmarks.
//!
//! Speaks a GoTrue/PostgREST style HTTP API with `reqwest`: PKCE OAuth
//! redirect sign-in, bearer-authenticated CRUD on the `bookmarks` table,
//! and a change feed produced by polling the owner's list and diffing
//! consecutive snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

use super::{Backend, ChangeSubscription, CHANGE_BUFFER};
use crate::database::connection::Database;
use crate::services::session_vault::SessionVault;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::BackendError;
use crate::types::event::ChangeEvent;
use crate::types::session::{AuthSession, Identity, SignInFlow};
use crate::types::settings::BackendSettings;

/// Refresh tokens this many seconds before they expire.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// PKCE verifier entropy in bytes.
const VERIFIER_BYTES: usize = 32;

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Identity,
}

impl From<TokenResponse> for AuthSession {
    fn from(t: TokenResponse) -> Self {
        AuthSession {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at: t.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            user: t.user,
        }
    }
}

/// Backend talking to a hosted HTTP API.
pub struct RestBackend {
    inner: Arc<RestInner>,
    poll_interval: Duration,
}

/// State shared with change-feed pollers.
struct RestInner {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    vault: SessionVault,
    session: Mutex<Option<AuthSession>>,
    /// Serializes refreshes so one expiring token is exchanged once.
    refresh: tokio::sync::Mutex<()>,
    pkce_verifier: Mutex<Option<Zeroizing<String>>>,
    sessions: watch::Sender<Option<Identity>>,
}

impl RestBackend {
    pub fn new(settings: &BackendSettings, db: Arc<Database>) -> Result<Self, BackendError> {
        if settings.rest_url.is_empty() {
            return Err(BackendError::Network("backend.rest_url is not configured".to_string()));
        }
        Url::parse(&settings.rest_url)
            .map_err(|e| BackendError::Network(format!("backend.rest_url is invalid: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let (sessions, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(RestInner {
                client,
                base_url: settings.rest_url.trim_end_matches('/').to_string(),
                anon_key: settings.anon_key.clone(),
                vault: SessionVault::new(db)?,
                session: Mutex::new(None),
                refresh: tokio::sync::Mutex::new(()),
                pkce_verifier: Mutex::new(None),
                sessions,
            }),
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
        })
    }

    /// Builds the provider authorize URL for a PKCE flow with `challenge`.
    pub fn authorize_url(&self, provider: &str, redirect_to: &str, challenge: &str) -> Result<String, BackendError> {
        let url = Url::parse_with_params(
            &self.inner.auth_url("authorize"),
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(url.into())
    }
}

impl RestInner {
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    /// Bearer token for the current session, exchanged first when it is
    /// within [`EXPIRY_LEEWAY_SECS`] of expiring.
    ///
    /// A refresh the server rejects ends the session and yields
    /// [`BackendError::Unauthenticated`]. A transport failure keeps the
    /// session so a later call can retry.
    async fn access_token(&self) -> Result<Zeroizing<String>, BackendError> {
        let _refreshing = self.refresh.lock().await;
        let refresh_token = {
            let current = self.session.lock();
            let session = current.as_ref().ok_or(BackendError::Unauthenticated)?;
            if !session.is_expired(Utc::now(), EXPIRY_LEEWAY_SECS) {
                return Ok(Zeroizing::new(session.access_token.clone()));
            }
            session.refresh_token.clone().map(Zeroizing::new)
        };

        let Some(refresh_token) = refresh_token else {
            info!("session expired without a refresh token; signed out");
            self.drop_session();
            return Err(BackendError::Unauthenticated);
        };
        match self
            .token_request("refresh_token", json!({ "refresh_token": refresh_token.as_str() }))
            .await
        {
            Ok(session) => {
                let token = Zeroizing::new(session.access_token.clone());
                let identity = self.install_session(session);
                debug!(user = %identity.user_id, "access token refreshed");
                Ok(token)
            }
            Err(e @ BackendError::Network(_)) => {
                warn!(error = %e, "token refresh unreachable; keeping session");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "token refresh rejected; signed out");
                self.drop_session();
                Err(BackendError::Unauthenticated)
            }
        }
    }

    fn current_identity(&self) -> Option<Identity> {
        self.session.lock().as_ref().map(|s| s.user.clone())
    }

    /// Stores a fresh session and announces its identity.
    fn install_session(&self, session: AuthSession) -> Identity {
        let identity = session.user.clone();
        if let Err(e) = self.vault.save(&session) {
            warn!(error = %e, "could not persist session; it will not survive a restart");
        }
        *self.session.lock() = Some(session);
        self.sessions.send_replace(Some(identity.clone()));
        identity
    }

    fn drop_session(&self) {
        *self.session.lock() = None;
        if let Err(e) = self.vault.clear() {
            warn!(error = %e, "could not clear persisted session");
        }
        self.sessions.send_replace(None);
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> Result<AuthSession, BackendError> {
        let resp = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let token: TokenResponse = check(resp).await?.json().await.map_err(network)?;
        Ok(token.into())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Bookmark>, BackendError> {
        let token = self.access_token().await?;
        let owner_filter = format!("eq.{}", owner);
        let resp = self
            .client
            .get(self.rest_url("bookmarks"))
            .query(&[
                ("select", "*"),
                ("user_id", owner_filter.as_str()),
                ("order", "created_at.desc"),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(network)?;
        check(resp).await?.json().await.map_err(network)
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_current_session(&self) -> Result<Option<Identity>, BackendError> {
        let stored = match self.inner.vault.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "stored session unreadable; discarding");
                self.inner.vault.clear()?;
                None
            }
        };
        let Some(stored) = stored else {
            return Ok(None);
        };

        *self.inner.session.lock() = Some(stored);
        match self.inner.access_token().await {
            Ok(_) => {
                let identity = self.inner.current_identity();
                self.inner.sessions.send_replace(identity.clone());
                Ok(identity)
            }
            Err(BackendError::Unauthenticated) => Ok(None),
            Err(e) => {
                // Vault copy stays for the next start.
                *self.inner.session.lock() = None;
                Err(e)
            }
        }
    }

    fn session_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.inner.sessions.subscribe()
    }

    async fn sign_in(&self, provider: &str, redirect_to: &str) -> Result<SignInFlow, BackendError> {
        let mut raw = Zeroizing::new([0u8; VERIFIER_BYTES]);
        SystemRandom::new()
            .fill(&mut raw[..])
            .map_err(|_| BackendError::Serialization("Failed to generate PKCE verifier".to_string()))?;
        let verifier = Zeroizing::new(BASE64_URL.encode(&raw[..]));
        let challenge = pkce_challenge(&verifier);

        let authorize_url = self.authorize_url(provider, redirect_to, &challenge)?;
        *self.inner.pkce_verifier.lock() = Some(verifier);
        info!(%provider, "sign-in redirect issued");
        Ok(SignInFlow::Redirect { authorize_url })
    }

    async fn complete_sign_in(&self, code: &str) -> Result<Identity, BackendError> {
        let verifier = self
            .inner
            .pkce_verifier
            .lock()
            .take()
            .ok_or(BackendError::Unauthenticated)?;
        let session = self
            .inner
            .token_request(
                "pkce",
                json!({ "auth_code": code, "code_verifier": verifier.as_str() }),
            )
            .await?;
        let identity = self.inner.install_session(session);
        info!(user = %identity.user_id, "signed in");
        Ok(identity)
    }

    /// Revokes the session server-side and forgets it locally. A token the
    /// server no longer accepts still signs the user out.
    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = match self.inner.access_token().await {
            Ok(token) => token,
            Err(BackendError::Unauthenticated) => {
                self.inner.drop_session();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let resp = self
            .inner
            .client
            .post(self.inner.auth_url("logout"))
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(network)?;
        match check(resp).await {
            Ok(_) => {}
            Err(BackendError::Api { status: 401, .. }) => debug!("session already revoked server-side"),
            Err(e) => return Err(e),
        }
        self.inner.drop_session();
        info!("signed out");
        Ok(())
    }

    async fn list_bookmarks(&self, owner: &str) -> Result<Vec<Bookmark>, BackendError> {
        self.inner.list(owner).await
    }

    async fn create_bookmark(&self, new: NewBookmark) -> Result<Bookmark, BackendError> {
        let token = self.inner.access_token().await?;
        let resp = self
            .inner
            .client
            .post(self.inner.rest_url("bookmarks"))
            .header("apikey", &self.inner.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(token.as_str())
            .json(&new)
            .send()
            .await
            .map_err(network)?;
        let mut rows: Vec<Bookmark> = check(resp).await?.json().await.map_err(network)?;
        if rows.is_empty() {
            return Err(BackendError::Serialization("insert returned no row".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_bookmark(&self, id: &str) -> Result<(), BackendError> {
        let token = self.inner.access_token().await?;
        let id_filter = format!("eq.{}", id);
        let resp = self
            .inner
            .client
            .delete(self.inner.rest_url("bookmarks"))
            .query(&[("id", id_filter.as_str())])
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(network)?;
        check(resp).await?;
        Ok(())
    }

    async fn subscribe_to_changes(&self, owner: &str) -> Result<ChangeSubscription, BackendError> {
        let baseline = self.inner.list(owner).await?;
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let inner = Arc::clone(&self.inner);
        let filter = owner.to_string();
        let period = self.poll_interval;

        let producer = tokio::spawn(async move {
            let mut previous = baseline;
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let next = match inner.list(&filter).await {
                    Ok(next) => next,
                    Err(BackendError::Unauthenticated) => break,
                    Err(e) => {
                        warn!(error = %e, "change poll failed; retrying next tick");
                        continue;
                    }
                };
                for event in diff_snapshots(&previous, &next) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                previous = next;
            }
        });

        Ok(ChangeSubscription::new(owner, rx, producer))
    }
}

/// Events that turn snapshot `prev` into `next`.
///
/// Both inputs are newest first. Deletions come first, then creations
/// oldest first so that head insertion leaves the newest record in front,
/// then updates.
pub fn diff_snapshots(prev: &[Bookmark], next: &[Bookmark]) -> Vec<ChangeEvent> {
    let before: HashMap<&str, &Bookmark> = prev.iter().map(|b| (b.id.as_str(), b)).collect();
    let after: HashSet<&str> = next.iter().map(|b| b.id.as_str()).collect();

    let mut events: Vec<ChangeEvent> = prev
        .iter()
        .filter(|b| !after.contains(b.id.as_str()))
        .map(|b| ChangeEvent::Deleted { id: b.id.clone() })
        .collect();

    events.extend(
        next.iter()
            .rev()
            .filter(|b| !before.contains_key(b.id.as_str()))
            .map(|b| ChangeEvent::Created { record: b.clone() }),
    );

    events.extend(next.iter().filter_map(|b| match before.get(b.id.as_str()) {
        Some(old) if old.title != b.title || old.url != b.url => {
            Some(ChangeEvent::Updated { record: b.clone() })
        }
        _ => None,
    }));

    events
}

/// S256 PKCE challenge for `verifier`.
pub fn pkce_challenge(verifier: &str) -> String {
    BASE64_URL.encode(digest::digest(&digest::SHA256, verifier.as_bytes()).as_ref())
}

fn network(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

/// Passes 2xx responses through; turns anything else into [`BackendError::Api`]
/// carrying the server's own message when it sent one.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or(text);
    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}
