use cbr_files::{ContentHash, ContentPool, DirPool, FileDescriptor, FileOwner, FileRelocator, MemoryFileTable, MemoryPool};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

proptest! {
    #[test]
    fn pool_holds_one_blob_per_distinct_content(blobs in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..20)) {
        let pool = MemoryPool::new();
        for blob in &blobs {
            pool.put(blob).unwrap();
        }
        let distinct: HashSet<_> = blobs.iter().collect();
        prop_assert_eq!(pool.blob_count(), distinct.len());
    }
}

#[test]
fn concurrent_restores_share_destination_pool() {
    let archive = Arc::new(MemoryPool::new());
    let dest = Arc::new(MemoryPool::new());
    let table = Arc::new(MemoryFileTable::new());
    let hash = archive.put(b"handbook").unwrap();

    std::thread::scope(|scope| {
        for n in 0..4_i64 {
            let archive = archive.clone();
            let dest = dest.clone();
            let table = table.clone();
            scope.spawn(move || {
                let file = FileDescriptor::new(1, "course", "summary", 0, format!("h{n}.pdf"), hash);
                FileRelocator::new()
                    .copy_to_destination(&*archive, &*dest, &*table, &file, FileOwner { contextid: 100 + n, itemid: 0 })
                    .unwrap();
            });
        }
    });

    assert_eq!(dest.blob_count(), 1);
    assert_eq!(table.len(), 4);
}

#[test]
fn archive_to_directory_pool() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryPool::new();
    let archive = DirPool::open(dir.path()).unwrap();
    let hash = source.put(b"lab sheet").unwrap();
    let file = FileDescriptor::new(3, "mod_assign", "intro", 0, "lab.txt", hash).with_size(9);

    let path = FileRelocator::new().copy_to_archive(&source, &archive, &file).unwrap();

    assert!(dir.path().join(path.trim_start_matches("files/")).is_file());
    assert_eq!(archive.get(&hash).unwrap().unwrap(), b"lab sheet");
    assert!(!archive.exists(&ContentHash::compute(b"absent")));
}
