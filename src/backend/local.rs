//! Local backend for smartmarks.
//!
//! Implements [`Backend`] on top of the SQLite database via `rusqlite`.
//! Sign-in completes immediately as the configured local user, and change
//! events are fanned out to subscribers over a `tokio` broadcast channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Backend, ChangeSubscription, CHANGE_BUFFER};
use crate::database::connection::Database;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::BackendError;
use crate::types::event::ChangeEvent;
use crate::types::session::{Identity, SignInFlow};

/// Capacity of the fan-out channel shared by all subscribers.
const FANOUT_CAPACITY: usize = 1024;

/// Backend persisted in a local SQLite file.
pub struct LocalBackend {
    db: Arc<Database>,
    local_user: String,
    sessions: watch::Sender<Option<Identity>>,
    changes: broadcast::Sender<(String, ChangeEvent)>,
}

impl LocalBackend {
    /// Creates a backend that signs in as `local_user`.
    ///
    /// The session channel starts at whatever session the database remembers.
    pub fn new(db: Arc<Database>, local_user: &str) -> Result<Self, BackendError> {
        let stored = Self::stored_session(&db)?;
        let (sessions, _) = watch::channel(stored);
        let (changes, _) = broadcast::channel(FANOUT_CAPACITY);
        Ok(Self {
            db,
            local_user: local_user.to_string(),
            sessions,
            changes,
        })
    }

    fn stored_session(db: &Database) -> Result<Option<Identity>, BackendError> {
        let conn = db.connection();
        let result = conn.query_row(
            "SELECT user_id, email FROM local_session WHERE id = 'default'",
            [],
            |row| {
                Ok(Identity {
                    user_id: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        );
        match result {
            Ok(identity) => Ok(Some(identity)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The user currently signed in, required by every data operation.
    fn signed_in_user(&self) -> Result<String, BackendError> {
        self.sessions
            .borrow()
            .as_ref()
            .map(|i| i.user_id.clone())
            .ok_or(BackendError::Unauthenticated)
    }

    fn publish(&self, owner: &str, event: ChangeEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send((owner.to_string(), event));
    }

    fn row_to_bookmark(row: &rusqlite::Row) -> rusqlite::Result<Bookmark> {
        let created_ms: i64 = row.get(4)?;
        Ok(Bookmark {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            owner: row.get(3)?,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn get_current_session(&self) -> Result<Option<Identity>, BackendError> {
        Self::stored_session(&self.db)
    }

    fn session_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.sessions.subscribe()
    }

    async fn sign_in(&self, provider: &str, _redirect_to: &str) -> Result<SignInFlow, BackendError> {
        self.complete_sign_in(provider).await?;
        Ok(SignInFlow::Completed)
    }

    async fn complete_sign_in(&self, _code: &str) -> Result<Identity, BackendError> {
        let identity = Identity::new(self.local_user.clone());
        self.db.connection().execute(
            "INSERT OR REPLACE INTO local_session (id, user_id, email, signed_in_at) VALUES ('default', ?1, ?2, ?3)",
            params![identity.user_id, identity.email, Utc::now().timestamp()],
        )?;
        info!(user = %identity.user_id, "local sign-in");
        self.sessions.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.db
            .connection()
            .execute("DELETE FROM local_session", [])?;
        info!("local sign-out");
        self.sessions.send_replace(None);
        Ok(())
    }

    async fn list_bookmarks(&self, owner: &str) -> Result<Vec<Bookmark>, BackendError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, title, url, user_id, created_at FROM bookmarks \
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![owner], Self::row_to_bookmark)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn create_bookmark(&self, new: NewBookmark) -> Result<Bookmark, BackendError> {
        let user = self.signed_in_user()?;
        if user != new.owner {
            return Err(BackendError::Api {
                status: 403,
                message: "new row violates row-level security policy for table \"bookmarks\"".to_string(),
            });
        }

        let created_ms = Utc::now().timestamp_millis();
        let record = Bookmark {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            url: new.url,
            owner: new.owner,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        };

        self.db.connection().execute(
            "INSERT INTO bookmarks (id, title, url, user_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.id, record.title, record.url, record.owner, created_ms],
        )?;

        debug!(id = %record.id, "bookmark created");
        self.publish(&record.owner, ChangeEvent::Created { record: record.clone() });
        Ok(record)
    }

    async fn delete_bookmark(&self, id: &str) -> Result<(), BackendError> {
        let user = self.signed_in_user()?;
        let affected = self.db.connection().execute(
            "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
            params![id, user],
        )?;

        // Deleting an absent row succeeds, matching the hosted API.
        if affected == 0 {
            debug!(%id, "delete matched no rows");
            return Ok(());
        }
        debug!(%id, "bookmark deleted");
        self.publish(&user, ChangeEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    async fn subscribe_to_changes(&self, owner: &str) -> Result<ChangeSubscription, BackendError> {
        let mut fanout = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let filter = owner.to_string();

        let producer = tokio::spawn(async move {
            loop {
                match fanout.recv().await {
                    Ok((event_owner, event)) => {
                        if event_owner != filter {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change subscriber lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ChangeSubscription::new(owner, rx, producer))
    }
}
