//! Unit tests for the events the RPC bridge pushes to the UI without a request.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bookmark, MockBackend};
use serde_json::Value;
use smartmarks::app::App;
use smartmarks::rpc_handler::forward_events;
use smartmarks::services::settings_engine::SettingsEngine;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn setup(backend: &Arc<MockBackend>) -> (Arc<App>, TempDir) {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let settings = SettingsEngine::new(Some(tmp.path().join("settings.json")));
    (App::with_backend(backend.as_backend(), settings), tmp)
}

/// Receives events until one satisfies `want`, or gives up after two seconds.
async fn wait_for<F: Fn(&Value) -> bool>(rx: &mut mpsc::Receiver<Value>, want: F) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) if want(&event) => return Some(event),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_startup_session_and_list_are_pushed() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    backend.seed(bookmark("b", "u1", 20));
    let (app, _tmp) = setup(&backend);

    let (tx, mut rx) = mpsc::channel(64);
    forward_events(&app, tx);
    app.start().await;

    let session = wait_for(&mut rx, |e| e["event"] == "session.changed").await;
    assert_eq!(session.unwrap()["identity"]["id"], "u1");

    let list = wait_for(&mut rx, |e| {
        e["event"] == "bookmarks.changed" && e["bookmarks"].as_array().is_some_and(|b| b.len() == 2)
    })
    .await
    .expect("loaded list was never pushed");
    assert_eq!(list["bookmarks"][0]["id"], "b");
    assert_eq!(list["bookmarks"][1]["id"], "a");
    app.shutdown();
}

#[tokio::test]
async fn test_failed_initial_load_is_pushed_as_notification() {
    let backend = MockBackend::signed_in("u1");
    MockBackend::set(&backend.fail_list, true);
    let (app, _tmp) = setup(&backend);

    let (tx, mut rx) = mpsc::channel(64);
    forward_events(&app, tx);
    app.start().await;

    let note = wait_for(&mut rx, |e| e["event"] == "notification")
        .await
        .expect("no notification pushed");
    assert_eq!(note["level"], "error");
    assert_eq!(note["message"], "service unavailable");
    app.shutdown();
}

#[tokio::test]
async fn test_sign_out_is_pushed() {
    let backend = MockBackend::signed_in("u1");
    let (app, _tmp) = setup(&backend);

    let (tx, mut rx) = mpsc::channel(64);
    forward_events(&app, tx);
    app.start().await;
    assert!(wait_for(&mut rx, |e| e["event"] == "session.changed").await.is_some());

    app.logout().await.unwrap();
    let event = wait_for(&mut rx, |e| e["event"] == "session.changed" && e["identity"].is_null()).await;
    assert!(event.is_some());
    app.shutdown();
}
