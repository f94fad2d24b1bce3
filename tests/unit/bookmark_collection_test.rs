//! Unit tests for `BookmarkCollection` and the identity-scoped `BookmarkStore`.

#[path = "../common/mod.rs"]
mod common;

use common::{bookmark, ids};
use rstest::rstest;
use smartmarks::managers::bookmark_collection::BookmarkCollection;
use smartmarks::managers::bookmark_store::{BookmarkStore, MergeResult, SkipReason};
use smartmarks::types::session::Identity;

fn loaded() -> BookmarkCollection {
    let mut c = BookmarkCollection::new();
    c.replace_all(vec![bookmark("c", "u1", 30), bookmark("b", "u1", 20), bookmark("a", "u1", 10)]);
    c
}

// ─── Collection ───

#[test]
fn test_insert_front_is_idempotent() {
    let mut c = loaded();
    assert!(c.insert_front(bookmark("d", "u1", 40)));
    assert!(!c.insert_front(bookmark("d", "u1", 40)));
    assert_eq!(ids(c.snapshot()), vec!["d", "c", "b", "a"]);
}

#[test]
fn test_insert_front_of_present_id_keeps_position() {
    let mut c = loaded();
    assert!(!c.insert_front(bookmark("a", "u1", 10)));
    assert_eq!(ids(c.snapshot()), vec!["c", "b", "a"]);
}

#[test]
fn test_remove_by_id_twice_equals_once() {
    let mut c = loaded();
    assert!(c.remove_by_id("b").is_some());
    let once = c.clone();
    assert!(c.remove_by_id("b").is_none());
    assert_eq!(c, once);
}

#[test]
fn test_remove_absent_is_noop() {
    let mut c = loaded();
    assert!(c.remove_by_id("zzz").is_none());
    assert_eq!(c.len(), 3);
}

#[rstest]
#[case::newest(35, vec!["x", "c", "b", "a"])]
#[case::middle(25, vec!["c", "x", "b", "a"])]
#[case::oldest(5, vec!["c", "b", "a", "x"])]
#[case::tie(20, vec!["c", "b", "x", "a"])]
fn test_insert_sorted_position(#[case] secs: i64, #[case] expected: Vec<&str>) {
    let mut c = loaded();
    assert!(c.insert_sorted(bookmark("x", "u1", secs)));
    assert_eq!(ids(c.snapshot()), expected);
}

#[test]
fn test_replace_all_replaces_wholesale() {
    let mut c = loaded();
    c.replace_all(vec![bookmark("z", "u1", 1)]);
    assert_eq!(ids(c.snapshot()), vec!["z"]);
    assert!(c.get("a").is_none());
    assert!(c.contains("z"));
}

#[test]
fn test_clear_empties() {
    let mut c = loaded();
    c.clear();
    assert!(c.is_empty());
}

// ─── Store ───

#[test]
fn test_store_without_identity_rejects_inserts() {
    let store = BookmarkStore::new();
    let scope = store.scope();
    assert_eq!(
        store.insert_front(&scope, bookmark("a", "u1", 1)),
        MergeResult::Skipped(SkipReason::ForeignOwner)
    );
    assert!(store.is_empty());
}

#[test]
fn test_store_rejects_foreign_owner() {
    let store = BookmarkStore::new();
    let scope = store.reset(Some(Identity::new("u1")));
    assert_eq!(
        store.insert_front(&scope, bookmark("a", "u2", 1)),
        MergeResult::Skipped(SkipReason::ForeignOwner)
    );
    assert_eq!(store.replace_all(&scope, vec![bookmark("b", "u1", 2), bookmark("c", "u2", 3)]), Some(1));
    assert_eq!(ids(&store.snapshot()), vec!["b"]);
}

#[test]
fn test_store_discards_stale_scope() {
    let store = BookmarkStore::new();
    let old = store.reset(Some(Identity::new("u1")));
    let current = store.reset(Some(Identity::new("u1")));
    assert_ne!(old.generation, current.generation);
    assert!(!store.is_current(&old));

    assert_eq!(store.replace_all(&old, vec![bookmark("a", "u1", 1)]), None);
    assert_eq!(
        store.insert_front(&old, bookmark("b", "u1", 2)),
        MergeResult::Skipped(SkipReason::StaleScope)
    );
    assert_eq!(store.remove_by_id(&old, "a"), MergeResult::Skipped(SkipReason::StaleScope));
    assert!(store.is_empty());
}

#[test]
fn test_store_reset_clears_and_bumps_revision() {
    let store = BookmarkStore::new();
    let rx = store.subscribe();
    let scope = store.reset(Some(Identity::new("u1")));
    store.insert_front(&scope, bookmark("a", "u1", 1));
    let before = *rx.borrow();

    store.reset(None);
    assert!(store.is_empty());
    assert!(store.identity().is_none());
    assert!(*rx.borrow() > before);
}

#[test]
fn test_store_skip_does_not_bump_revision() {
    let store = BookmarkStore::new();
    let rx = store.subscribe();
    let scope = store.reset(Some(Identity::new("u1")));
    store.insert_front(&scope, bookmark("a", "u1", 1));
    let before = *rx.borrow();

    assert!(!store.insert_front(&scope, bookmark("a", "u1", 1)).changed());
    assert!(!store.remove_by_id(&scope, "nope").changed());
    assert_eq!(*rx.borrow(), before);
}
