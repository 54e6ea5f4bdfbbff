use scaleout_ring::{Mapping, Ring};
use std::sync::Arc;
use std::thread;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Event(u64);

impl Mapping for Event {
    fn id(&self) -> u64 {
        self.0
    }
}

/// Builds the ring used throughout these end-to-end scenarios:
/// `F + 1 = 5`, `fragmentSize = 4`, capacity 16.
fn scenario_ring() -> Ring<Event> {
    Ring::new(16)
}

#[test]
fn s1_initial_append_and_read_from_zero() {
    let ring = scenario_ring();
    for id in [10, 20, 30, 40] {
        ring.append(Event(id));
    }
    let batch = ring.read(0);
    assert_eq!(
        batch.messages,
        vec![Event(10), Event(20), Event(30), Event(40)]
    );
    assert!(!batch.has_more);
}

#[test]
fn s2_read_midway_through_first_fragment() {
    let ring = scenario_ring();
    for id in [10, 20, 30, 40] {
        ring.append(Event(id));
    }
    let batch = ring.read(2);
    assert_eq!(batch.messages, vec![Event(30), Event(40)]);
    assert!(!batch.has_more);
}

#[test]
fn s3_read_crossing_into_the_next_fragment() {
    let ring = scenario_ring();
    for id in [10, 20, 30, 40] {
        ring.append(Event(id));
    }
    for id in [50, 60, 70, 80] {
        ring.append(Event(id));
    }

    let batch = ring.read(3);
    assert_eq!(batch.messages, vec![Event(40)]);
    assert!(batch.has_more);

    let follow_up = ring.read(4);
    assert_eq!(
        follow_up.messages,
        vec![Event(50), Event(60), Event(70), Event(80)]
    );
    assert!(!follow_up.has_more);
}

#[test]
fn s4_full_wraparound_forces_overrun_recovery() {
    let ring = scenario_ring();
    for id in (10..=300).step_by(10) {
        ring.append(Event(id));
    }

    let batch = ring.read(0);
    assert!(batch.has_more);
    assert_eq!(batch.messages.len(), 4);
    assert!(batch.next_cursor > 0);
}

#[test]
fn s5_read_since_mapping_id_after_its_fragment_was_overwritten() {
    let ring = scenario_ring();
    for id in (10..=300).step_by(10) {
        ring.append(Event(id));
    }

    let batch = ring.read_since_mapping_id(30);
    assert!(batch.has_more);
    assert!(!batch.messages.is_empty());
}

#[test]
fn s6_read_since_mapping_id_hits_directly() {
    let ring = scenario_ring();
    for id in [10, 20, 30, 40] {
        ring.append(Event(id));
    }

    let batch = ring.read_since_mapping_id(20);
    assert_eq!(batch.messages, vec![Event(30), Event(40)]);
    assert!(!batch.has_more);
}

#[test]
fn read_since_mapping_id_below_watermark_returns_oldest_fragment() {
    let ring = scenario_ring();
    for id in (10..=300).step_by(10) {
        ring.append(Event(id));
    }

    let batch = ring.read_since_mapping_id(0);
    assert!(batch.has_more);
    assert!(!batch.messages.is_empty());
}

#[test]
fn read_since_mapping_id_ahead_of_the_store_is_empty() {
    let ring = scenario_ring();
    for id in [10, 20, 30, 40] {
        ring.append(Event(id));
    }

    let batch = ring.read_since_mapping_id(999);
    assert!(batch.messages.is_empty());
    assert!(!batch.has_more);
}

#[test]
fn empty_ring_binary_search_returns_empty_batch() {
    let ring = scenario_ring();
    let batch = ring.read_since_mapping_id(1);
    assert!(batch.messages.is_empty());
}

#[test]
fn multi_producer_fifo_per_producer() {
    const N_PRODUCERS: usize = 4;
    const ITEMS_PER_PRODUCER: u64 = 2_000;

    let ring = Arc::new(Ring::<Event>::new(4096));
    let mut handles = Vec::new();

    for producer_id in 0..N_PRODUCERS {
        let ring = Arc::clone(&ring);
        handles.push(thread::spawn(move || {
            let base = producer_id as u64 * 1_000_000;
            let mut seqs = Vec::with_capacity(ITEMS_PER_PRODUCER as usize);
            for i in 0..ITEMS_PER_PRODUCER {
                seqs.push(ring.append(Event(base + i)));
            }
            seqs
        }));
    }

    let mut all_seqs = Vec::new();
    for handle in handles {
        all_seqs.extend(handle.join().unwrap());
    }

    let total = all_seqs.len();
    assert_eq!(total, N_PRODUCERS * ITEMS_PER_PRODUCER as usize);
    all_seqs.sort_unstable();
    all_seqs.dedup();
    assert_eq!(all_seqs.len(), total, "append returned a duplicate sequence number");
}

#[test]
fn reader_never_observes_a_partially_published_slot() {
    // Hammer the boundary while a reader polls concurrently; every message
    // returned must be one that was actually appended, never a default or
    // torn value.
    let ring = Arc::new(Ring::<Event>::new(256));
    let writer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for id in 0..20_000u64 {
                ring.append(Event(id));
            }
        })
    };

    let reader = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            let mut cursor = 0u64;
            for _ in 0..5_000 {
                let batch = ring.read(cursor);
                for m in &batch.messages {
                    assert!(m.0 < 20_000);
                }
                cursor = batch.next_cursor.max(cursor);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}
