//! Stress tests for meshline-routing
//!
//! These tests verify the correctness of the rule table under concurrent
//! access from many threads.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use meshline_core::{ForwardRule, KeyPair, Port, RouteDescriptor, RouteId, Rule, TransportId};
use meshline_routing::{MemoryRuleTable, RuleTable};

fn make_rule(id: RouteId, desc: RouteDescriptor) -> Rule {
    ForwardRule::new(
        Duration::from_secs(60),
        id,
        RouteId(id.0 + 1_000_000),
        TransportId::new_random(),
        desc,
    )
    .into()
}

fn make_desc() -> RouteDescriptor {
    let keys = KeyPair::generate_many(2);
    RouteDescriptor::new(keys[0].public_key(), keys[1].public_key(), Port(10), Port(20))
}

#[test]
fn test_concurrent_reservations_are_unique() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 500;

    let table = Arc::new(MemoryRuleTable::default());

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut ids = Vec::with_capacity(PER_THREAD);
                for j in 0..PER_THREAD {
                    // Mix single and batched reservations.
                    let n = 1 + (i + j) % 3;
                    ids.extend(table.reserve_keys(n).unwrap());
                }
                ids
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert_ne!(id, RouteId(0), "route id 0 must never be issued");
            assert!(seen.insert(id), "route id {} issued twice", id);
        }
    }

    assert!(seen.len() >= THREADS * PER_THREAD);
}

#[test]
fn test_concurrent_save_and_delete() {
    const THREADS: usize = 8;
    const RULES_PER_THREAD: usize = 1_000;

    let table = Arc::new(MemoryRuleTable::default());
    let desc = make_desc();
    let start = Instant::now();

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let ids = table.reserve_keys(RULES_PER_THREAD).unwrap();
                for id in &ids {
                    table.save_rule(make_rule(*id, desc)).unwrap();
                }

                // Even threads release everything they saved.
                if i % 2 == 0 {
                    table.del_rules(&ids);
                }
                ids
            })
        })
        .collect();

    let mut kept = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let ids = handle.join().unwrap();
        if i % 2 == 1 {
            kept.extend(ids);
        }
    }

    let duration = start.elapsed();
    println!(
        "Saved {} rules across {} threads in {:?}",
        THREADS * RULES_PER_THREAD,
        THREADS,
        duration
    );

    assert_eq!(table.count(), kept.len());
    for id in kept {
        assert_eq!(table.rule(id).unwrap().key_route_id(), id);
    }

    assert!(duration < Duration::from_secs(10), "Saving should be fast");
}

#[test]
fn test_snapshot_under_writes() {
    let table = Arc::new(MemoryRuleTable::default());
    let desc = make_desc();

    let writer = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for _ in 0..2_000 {
                let ids = table.reserve_keys(1).unwrap();
                table.save_rule(make_rule(ids[0], desc)).unwrap();
            }
        })
    };

    let mut snapshots = 0;
    while !writer.is_finished() {
        let bytes = table.snapshot().unwrap();
        let restored = MemoryRuleTable::default();
        restored.restore(&bytes).unwrap();
        snapshots += 1;
    }
    writer.join().unwrap();

    let restored = MemoryRuleTable::default();
    assert_eq!(restored.restore(&table.snapshot().unwrap()).unwrap(), 2_000);
    println!("Took {} snapshots while writing", snapshots);
}
