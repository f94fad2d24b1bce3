//! Property-based tests for the bookmark collection invariants.
//!
//! Arbitrary interleavings of loads, head inserts, sorted inserts and removals
//! must keep ids unique, keep `created_at` descending when inserts are
//! chronological, and make repeated inserts/removals equivalent to one.

#[path = "../common/mod.rs"]
mod common;

use common::bookmark;
use proptest::prelude::*;
use smartmarks::managers::bookmark_collection::BookmarkCollection;
use smartmarks::types::bookmark::Bookmark;

#[derive(Debug, Clone)]
enum Op {
    InsertFront(u8),
    InsertSorted(u8),
    Remove(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..20).prop_map(Op::InsertFront),
        (0u8..20).prop_map(Op::InsertSorted),
        (0u8..20).prop_map(Op::Remove),
    ]
}

/// Id `n` always carries timestamp `n`, so the same id means the same record.
fn record(n: u8) -> Bookmark {
    bookmark(&format!("id-{}", n), "u1", i64::from(n))
}

fn assert_unique(c: &BookmarkCollection) {
    let mut seen = std::collections::HashSet::new();
    for b in c.snapshot() {
        assert!(seen.insert(b.id.clone()), "duplicate id {}", b.id);
    }
}

fn is_descending(c: &BookmarkCollection) -> bool {
    c.snapshot().windows(2).all(|w| w[0].created_at >= w[1].created_at)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ids_stay_unique(ops in proptest::collection::vec(arb_op(), 0..60)) {
        let mut c = BookmarkCollection::new();
        for op in ops {
            match op {
                Op::InsertFront(n) => { c.insert_front(record(n)); }
                Op::InsertSorted(n) => { c.insert_sorted(record(n)); }
                Op::Remove(n) => { c.remove_by_id(&format!("id-{}", n)); }
            }
            assert_unique(&c);
        }
    }

    #[test]
    fn sorted_inserts_and_removals_keep_order(
        seed in proptest::collection::vec(0u8..20, 0..20),
        ops in proptest::collection::vec(prop_oneof![
            (0u8..20).prop_map(Op::InsertSorted),
            (0u8..20).prop_map(Op::Remove),
        ], 0..40),
    ) {
        let mut initial: Vec<Bookmark> = seed.into_iter().map(record).collect();
        initial.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut c = BookmarkCollection::new();
        c.replace_all(initial);
        prop_assert!(is_descending(&c));

        for op in ops {
            match op {
                Op::InsertSorted(n) => { c.insert_sorted(record(n)); }
                Op::Remove(n) => { c.remove_by_id(&format!("id-{}", n)); }
                Op::InsertFront(_) => unreachable!(),
            }
            prop_assert!(is_descending(&c));
        }
    }

    #[test]
    fn newer_head_inserts_keep_order(count in 1usize..30) {
        let mut c = BookmarkCollection::new();
        for n in 0..count {
            c.insert_front(record(n as u8));
            prop_assert!(is_descending(&c));
        }
        prop_assert_eq!(c.len(), count);
    }

    #[test]
    fn double_insert_equals_single(seed in proptest::collection::vec(0u8..20, 0..10), n in 0u8..20) {
        let mut once = BookmarkCollection::new();
        once.replace_all(seed.iter().copied().map(record).collect());
        let mut twice = once.clone();

        once.insert_front(record(n));
        twice.insert_front(record(n));
        twice.insert_front(record(n));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn double_remove_equals_single(seed in proptest::collection::vec(0u8..20, 0..10), n in 0u8..20) {
        let mut once = BookmarkCollection::new();
        once.replace_all(seed.iter().copied().map(record).collect());
        let mut twice = once.clone();

        let id = format!("id-{}", n);
        once.remove_by_id(&id);
        twice.remove_by_id(&id);
        twice.remove_by_id(&id);
        prop_assert_eq!(once, twice);
    }
}
