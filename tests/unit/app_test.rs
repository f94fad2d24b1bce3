//! End-to-end tests for the `App` root context against the scripted mock
//! backend: startup, identity switches, concurrent echoes and notifications.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{bookmark, eventually, ids, MockBackend};
use smartmarks::app::App;
use smartmarks::managers::mutation_pipeline::AddOutcome;
use smartmarks::services::settings_engine::SettingsEngine;
use smartmarks::types::event::{ChangeEvent, NotificationLevel};
use smartmarks::types::session::Identity;
use tempfile::TempDir;

fn setup(backend: &Arc<MockBackend>) -> (Arc<App>, TempDir) {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let settings = SettingsEngine::new(Some(tmp.path().join("settings.json")));
    (App::with_backend(backend.as_backend(), settings), tmp)
}

#[tokio::test]
async fn test_start_loads_prior_session_newest_first() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    backend.seed(bookmark("b", "u1", 20));
    backend.seed(bookmark("x", "u2", 30));
    let (app, _tmp) = setup(&backend);

    assert!(app.is_loading());
    app.start().await;
    assert!(!app.is_loading());
    assert_eq!(ids(&app.snapshot()), vec!["b", "a"]);
    assert!(app.ingestion().is_active());
    app.shutdown();
}

#[tokio::test]
async fn test_start_signed_out_is_empty() {
    let backend = MockBackend::new();
    backend.seed(bookmark("a", "u1", 10));
    let (app, _tmp) = setup(&backend);
    app.start().await;
    assert!(app.identity().is_none());
    assert!(app.snapshot().is_empty());
    assert_eq!(backend.open_subscriptions(), 0);
    app.shutdown();
}

#[tokio::test]
async fn test_login_callback_loads_bookmarks() {
    let backend = MockBackend::new();
    backend.seed(bookmark("a", "u9", 10));
    let (app, _tmp) = setup(&backend);
    app.start().await;

    app.complete_login("u9").await.unwrap();
    assert!(eventually(|| app.snapshot().len() == 1).await);
    assert_eq!(app.identity(), Some(Identity::new("u9")));
    app.shutdown();
}

#[tokio::test]
async fn test_identity_switch_isolates_records() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    backend.seed(bookmark("z", "u2", 5));
    let (app, _tmp) = setup(&backend);
    app.start().await;
    assert_eq!(ids(&app.snapshot()), vec!["a"]);

    backend.switch_session(Some(Identity::new("u2")));
    assert!(eventually(|| ids(&app.snapshot()) == vec!["z"]).await);
    assert!(app.snapshot().iter().all(|b| b.owner == "u2"));

    // A late push for the previous identity changes nothing.
    backend.emit("u1", ChangeEvent::Created { record: bookmark("late", "u1", 99) });
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(ids(&app.snapshot()), vec!["z"]);
    app.shutdown();
}

#[tokio::test]
async fn test_logout_clears_collection() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    let (app, _tmp) = setup(&backend);
    app.start().await;

    app.logout().await.unwrap();
    assert!(eventually(|| app.snapshot().is_empty()).await);
    assert!(app.identity().is_none());
    app.shutdown();
}

#[tokio::test]
async fn test_stale_fetch_after_identity_switch_is_discarded() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    backend.seed(bookmark("z", "u2", 5));
    let (app, _tmp) = setup(&backend);
    app.start().await;

    // Hold the next fetch (for u1) while the identity moves on.
    let gate = backend.gate_list();
    let reload = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.reload().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    app.store().reset(Some(Identity::new("u2")));
    gate.notify_one();
    reload.await.unwrap();

    assert!(app.snapshot().iter().all(|b| b.owner == "u2"));
    assert!(!app.snapshot().iter().any(|b| b.id == "a"));
    app.shutdown();
}

#[tokio::test]
async fn test_add_with_concurrent_echo_has_single_copy() {
    let backend = MockBackend::signed_in("u1");
    MockBackend::set(&backend.echo, true);
    let (app, _tmp) = setup(&backend);
    app.start().await;

    let outcome = app.add_bookmark("Docs", "docs.rs").await.unwrap();
    let AddOutcome::Committed(record) = outcome else {
        panic!("expected commit");
    };
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let snapshot = app.snapshot();
    assert_eq!(snapshot.iter().filter(|b| b.id == record.id).count(), 1);
    assert_eq!(snapshot[0].url, "https://docs.rs");
    app.shutdown();
}

#[tokio::test]
async fn test_remote_create_from_other_session_appears() {
    let backend = MockBackend::signed_in("u1");
    let (app, _tmp) = setup(&backend);
    app.start().await;

    backend.emit("u1", ChangeEvent::Created { record: bookmark("remote", "u1", 50) });
    assert!(eventually(|| app.snapshot().len() == 1).await);
    app.shutdown();
}

#[tokio::test]
async fn test_submission_failure_emits_notification() {
    let backend = MockBackend::signed_in("u1");
    MockBackend::set(&backend.fail_create, true);
    let (app, _tmp) = setup(&backend);
    app.start().await;
    let mut notifications = app.subscribe_notifications();

    assert!(app.add_bookmark("Docs", "docs.rs").await.is_err());
    let n = notifications.recv().await.unwrap();
    assert_eq!(n.level, NotificationLevel::Error);
    assert_eq!(n.message, "duplicate key value violates unique constraint");
    assert!(app.snapshot().is_empty());
    app.shutdown();
}

#[tokio::test]
async fn test_failed_initial_fetch_leaves_empty_and_notifies() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    MockBackend::set(&backend.fail_list, true);
    let (app, _tmp) = setup(&backend);
    let mut notifications = app.subscribe_notifications();

    app.start().await;
    assert!(app.snapshot().is_empty());
    assert_eq!(notifications.recv().await.unwrap().message, "service unavailable");

    MockBackend::set(&backend.fail_list, false);
    app.reload().await;
    assert_eq!(ids(&app.snapshot()), vec!["a"]);
    app.shutdown();
}

#[tokio::test]
async fn test_missing_change_feed_still_loads() {
    let backend = MockBackend::signed_in("u1");
    backend.seed(bookmark("a", "u1", 10));
    MockBackend::set(&backend.fail_subscribe, true);
    let (app, _tmp) = setup(&backend);
    app.start().await;

    assert_eq!(ids(&app.snapshot()), vec!["a"]);
    assert!(!app.ingestion().is_active());
    app.shutdown();
}

#[tokio::test]
async fn test_set_setting_persists() {
    let backend = MockBackend::new();
    let (app, tmp) = setup(&backend);
    app.set_setting("pipeline.rollback_failed_deletes", serde_json::json!(false)).unwrap();
    assert!(!app.settings().pipeline.rollback_failed_deletes);
    assert!(tmp.path().join("settings.json").exists());
    assert_eq!(app.config_path(), tmp.path().join("settings.json"));
}
