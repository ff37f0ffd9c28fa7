//! Id-map store properties

use cbr_core::{itemtype, BackupId, IdMapStore};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn lookups_return_what_was_recorded(pairs in prop::collection::hash_map(1i64..10_000, 1i64..10_000, 0..64)) {
        let store = IdMapStore::new();
        let op = BackupId::generate();
        for (old, new) in &pairs {
            store.record(op, itemtype::USER, *old, *new).unwrap();
        }
        for (old, new) in &pairs {
            prop_assert_eq!(store.lookup(op, itemtype::USER, *old), Some(*new));
            prop_assert_eq!(store.lookup(op, itemtype::ACTIVITY, *old), None);
        }
        prop_assert_eq!(store.count(op), pairs.len());
    }

    #[test]
    fn first_mapping_wins(old in 1i64..1000, first in 1i64..1000, second in 1i64..1000) {
        let store = IdMapStore::new();
        let op = BackupId::generate();
        store.record(op, itemtype::SECTION, old, first).unwrap();
        let again = store.record(op, itemtype::SECTION, old, second);
        if first == second {
            prop_assert!(again.is_ok());
        } else {
            let conflict = again.unwrap_err();
            prop_assert_eq!(conflict.existing, first);
            prop_assert_eq!(conflict.attempted, second);
        }
        prop_assert_eq!(store.lookup(op, itemtype::SECTION, old), Some(first));
    }

    #[test]
    fn purge_touches_one_operation(
        left in prop::collection::vec(1i64..500, 0..32),
        right in prop::collection::vec(1i64..500, 0..32),
    ) {
        let store = IdMapStore::new();
        let (a, b) = (BackupId::generate(), BackupId::generate());
        for id in &left {
            store.annotate(a, itemtype::USER, *id);
        }
        for id in &right {
            store.record(b, itemtype::USER, *id, id + 1000).unwrap();
        }
        let kept = store.count(b);
        store.purge(a);
        prop_assert_eq!(store.count(a), 0);
        prop_assert_eq!(store.count(b), kept);
        for id in &right {
            prop_assert_eq!(store.lookup(b, itemtype::USER, *id), Some(id + 1000));
        }
    }
}

#[test]
fn annotations_list_referenced_ids_in_order() {
    let store = IdMapStore::new();
    let op = BackupId::generate();
    for id in [9, 3, 5, 3] {
        store.annotate(op, itemtype::USER, id);
    }
    store.record(op, itemtype::USER, 7, 70).unwrap();
    // annotating a mapped id keeps the mapping
    store.annotate(op, itemtype::USER, 7);

    assert_eq!(store.annotated(op, itemtype::USER), vec![3, 5, 7, 9]);
    assert_eq!(store.lookup(op, itemtype::USER, 7), Some(70));
    assert_eq!(store.lookup(op, itemtype::USER, 3), Some(0));
}

#[test]
fn concurrent_operations_do_not_see_each_other() {
    let store = Arc::new(IdMapStore::new());
    let ops: Vec<BackupId> = (0..8).map(|_| BackupId::generate()).collect();

    std::thread::scope(|scope| {
        for (n, op) in ops.iter().enumerate() {
            let store = Arc::clone(&store);
            let offset = i64::try_from(n).unwrap() * 1000;
            scope.spawn(move || {
                for old in 1..=100 {
                    store.record(*op, itemtype::ACTIVITY, old, offset + old).unwrap();
                }
            });
        }
    });

    for (n, op) in ops.iter().enumerate() {
        assert_eq!(store.count(*op), 100);
        let offset = i64::try_from(n).unwrap() * 1000;
        assert_eq!(store.lookup(*op, itemtype::ACTIVITY, 42), Some(offset + 42));
    }

    for op in &ops {
        store.purge(*op);
    }
    assert!(store.is_empty());
}
