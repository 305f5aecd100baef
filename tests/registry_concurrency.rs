//! Registry concurrency: many lookups racing one insert observe either the
//! pre-insert or post-insert registry, never anything in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use facegate::{
    FaceEmbedding, FaceRegistry, InMemoryRegistryStore, RegistryEntry, EMBEDDING_DIM,
};

fn embedding_with(first: f32) -> FaceEmbedding {
    let mut values = vec![0.0f32; EMBEDDING_DIM];
    values[0] = first;
    FaceEmbedding::new(values).unwrap()
}

#[test]
fn lookups_racing_inserts_see_consistent_state() {
    let registry = Arc::new(FaceRegistry::open(Box::new(InMemoryRegistryStore::new())).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let probe = embedding_with(0.0);

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            let probe = probe.clone();
            std::thread::spawn(move || {
                let mut observations = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    if let Some((entry, distance)) = registry.lookup_nearest(&probe) {
                        // A visible entry is always complete.
                        assert!(!entry.name.is_empty());
                        assert_eq!(entry.embedding.values().len(), EMBEDDING_DIM);
                        assert!(distance.is_finite());
                    }
                    observations += 1;
                }
                observations
            })
        })
        .collect();

    for i in 0..50 {
        registry
            .insert(RegistryEntry::new(
                format!("person-{:02}", i),
                embedding_with(i as f32),
            ))
            .unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        let observations = reader.join().unwrap();
        assert!(observations > 0);
    }
    assert_eq!(registry.len(), 50);
}

#[test]
fn concurrent_inserts_of_the_same_name_enroll_exactly_once() {
    let registry = Arc::new(FaceRegistry::open(Box::new(InMemoryRegistryStore::new())).unwrap());

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry
                    .insert(RegistryEntry::new("Alice", embedding_with(i as f32)))
                    .is_ok()
            })
        })
        .collect();

    let successes = writers
        .into_iter()
        .map(|writer| writer.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(registry.len(), 1);
}
