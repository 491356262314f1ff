use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use mirador::ident::{Ident, IdentAllocator, IdentKind};

mod common;

#[test]
fn concurrent_allocation_is_unique_and_monotonic_per_thread() {
    common::init_logger();
    let ids = Arc::new(IdentAllocator::new());
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let ids = Arc::clone(&ids);
            thread::spawn(move || {
                let kind = match t % 4 {
                    0 => IdentKind::Model,
                    1 => IdentKind::Mesh,
                    2 => IdentKind::Material,
                    _ => IdentKind::Texture,
                };
                let batch: Vec<Ident> = (0..PER_THREAD).map(|_| ids.allocate(kind)).collect();
                (kind, batch)
            })
        })
        .collect();

    let mut seen: HashSet<Ident> = HashSet::new();
    for handle in handles {
        let (kind, batch) = handle.join().expect("allocator thread");
        assert!(
            batch.windows(2).all(|w| w[0] < w[1]),
            "values grow within a thread"
        );
        for id in batch {
            assert!(seen.insert(id), "{id} was handed out twice");
            assert_eq!(ids.kind_of(id), Some(kind));
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
}

#[test]
fn kind_of_is_none_for_values_never_allocated() {
    common::init_logger();
    // Mint an identifier value this allocator has never produced by
    // running a second allocator further ahead.
    let donor = IdentAllocator::new();
    for _ in 0..4 {
        donor.allocate(IdentKind::Mesh);
    }
    let foreign = donor.allocate(IdentKind::Mesh);

    let ids = IdentAllocator::new();
    let known = ids.allocate(IdentKind::Texture);
    assert_eq!(ids.kind_of(known), Some(IdentKind::Texture));
    assert_eq!(ids.kind_of(foreign), None);
}
