//! RPC method handler for the smartmarks JSON-RPC protocol.
//!
//! Kept apart from `rpc_server.rs` so dispatch can be unit-tested without
//! stdin/stdout. `handle_method` maps a method name and its params onto the
//! [`App`] and renders the result as JSON; `forward_events` renders the
//! pushed events.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::app::App;
use crate::managers::mutation_pipeline::{AddOutcome, DeleteOutcome, RejectReason};
use crate::types::session::SignInFlow;

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing {}", name))
}

fn reason_str(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::EmptyTitle => "empty_title",
        RejectReason::EmptyUrl => "empty_url",
        RejectReason::NoIdentity => "signed_out",
    }
}

/// Dispatches one JSON-RPC call.
///
/// Returns `Ok(Value)` on success or `Err(String)` with a message for the UI.
pub async fn handle_method(app: &App, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),

        // ─── Session ───
        "session.get" => Ok(json!({
            "identity": app.identity(),
            "loading": app.is_loading(),
        })),
        "session.login" => {
            let flow = app.login().await.map_err(|e| e.to_string())?;
            match flow {
                SignInFlow::Redirect { authorize_url } => Ok(json!({"flow": "redirect", "authorize_url": authorize_url})),
                SignInFlow::Completed => Ok(json!({"flow": "completed", "identity": app.identity()})),
            }
        }
        "session.callback" => {
            let code = str_param(params, "code")?;
            let identity = app.complete_login(code).await.map_err(|e| e.to_string())?;
            Ok(json!({"identity": identity}))
        }
        "session.logout" => {
            app.logout().await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Bookmarks ───
        "bookmark.list" => serde_json::to_value(app.snapshot()).map_err(|e| e.to_string()),
        "bookmark.add" => {
            let title = str_param(params, "title")?;
            let url = str_param(params, "url")?;
            match app.add_bookmark(title, url).await.map_err(|e| e.to_string())? {
                AddOutcome::Committed(record) => Ok(json!({"status": "committed", "bookmark": record})),
                AddOutcome::Rejected(reason) => Ok(json!({"status": "rejected", "reason": reason_str(reason)})),
                AddOutcome::Discarded(record) => Ok(json!({"status": "discarded", "bookmark": record})),
            }
        }
        "bookmark.delete" => {
            let id = str_param(params, "id")?;
            match app.delete_bookmark(id).await.map_err(|e| e.to_string())? {
                DeleteOutcome::Confirmed(removed) => Ok(json!({"ok": true, "removed": removed.is_some()})),
                DeleteOutcome::Rejected(reason) => Err(format!("delete refused: {}", reason_str(reason))),
            }
        }
        "bookmark.reload" => {
            app.reload().await;
            Ok(json!({"count": app.store().len()}))
        }

        // ─── Settings ───
        "settings.get" => serde_json::to_value(app.settings()).map_err(|e| e.to_string()),
        "settings.set" => {
            let key = str_param(params, "key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            app.set_setting(key, value).map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}

// ─── Events ───

/// Pushes session, list and notification changes to `out` until it closes.
///
/// Call before [`App::start`] so the initial session resolution and load
/// are pushed as well.
pub fn forward_events(app: &Arc<App>, out: mpsc::Sender<Value>) {
    let mut sessions = app.subscribe_session();
    let tx = out.clone();
    tokio::spawn(async move {
        while sessions.changed().await.is_ok() {
            let identity = sessions.borrow_and_update().clone();
            if tx.send(json!({"event": "session.changed", "identity": identity})).await.is_err() {
                break;
            }
        }
    });

    let mut revisions = app.subscribe_bookmarks();
    let weak = Arc::downgrade(app);
    let tx = out.clone();
    tokio::spawn(async move {
        while revisions.changed().await.is_ok() {
            let _ = revisions.borrow_and_update();
            let Some(app) = weak.upgrade() else { break };
            let event = json!({"event": "bookmarks.changed", "bookmarks": app.snapshot()});
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let mut notifications = app.subscribe_notifications();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => {
                    let event = json!({"event": "notification", "level": n.level, "message": n.message});
                    if out.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
