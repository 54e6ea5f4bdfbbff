//! The outer ring array, the global counters, and the Appender/Reader
//! algorithms that operate on them.
//!
//! =============================================================================
//! MEMORY ORDERING & SYNCHRONIZATION STRATEGY
//! =============================================================================
//!
//! - `next_free_seq`: readers load with Acquire; the producer that completes
//!   an append stores with Release (via `fetch_add`'s `AcqRel`). A reader
//!   observing `next_free_seq == N` is guaranteed to see every fragment
//!   installation that happened-before the increment that produced `N`.
//! - Fragment slots (`fragments[i]`, a `crossbeam_epoch::Atomic`): installed
//!   via `compare_exchange` with Release on success; loaded with Acquire by
//!   both producers and readers. A fragment displaced by a winning CAS is
//!   retired through the epoch guard (`defer_destroy`) rather than dropped
//!   immediately, since a reader may still hold a reference into it.
//! - `min_seq` / `min_mapping_id`: each only ever increases, store with
//!   Release, load with Acquire.
//! - `max_mapping`: best-effort only, `Relaxed` both ways. No algorithm
//!   depends on its freshness (spec'd as observation-only).
//! - `Fragment::length`: incremented non-atomically (`Relaxed`) after the
//!   CAS into a slot completes; a reader sees a value that is `<=` the true
//!   published count and never overstates it.
//!
//! =============================================================================

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::batch::MessageBatch;
use crate::config::RingConfig;
use crate::constants::{MAX_PER_FRAGMENT, MIN_FRAGMENTS, OVERFLOW_CUSHION};
use crate::fragment::Fragment;
use crate::invariants::{
    debug_assert_ring_residency, debug_assert_seq_monotonic, debug_assert_watermark_monotonic,
};
use crate::mapping::Mapping;

/// The bounded, append-only concurrent ring store.
///
/// A single `Ring<M>` is meant to be shared behind an `Arc` by every
/// producer and reader; all methods take `&self`. There is no internal
/// locking: coordination is entirely through the atomically-updated scalars
/// documented above and compare-and-swap on fragment slot pointers.
pub struct Ring<M: Mapping> {
    fragments: Box<[Atomic<Fragment<M>>]>,
    fragment_size: usize,
    num_fragments: usize,
    next_free_seq: CachePadded<AtomicU64>,
    min_seq: CachePadded<AtomicU64>,
    min_mapping_id: CachePadded<AtomicU64>,
    max_mapping: Atomic<M>,
    trace_prefix: Option<String>,
}

impl<M: Mapping> Ring<M> {
    /// Builds a ring with the given requested logical capacity, floored to
    /// [`RingConfig`]'s minimum, with no trace prefix.
    pub fn new(capacity: u32) -> Self {
        Self::with_config(RingConfig::new(capacity))
    }

    /// Builds a ring from a full [`RingConfig`].
    pub fn with_config(config: RingConfig) -> Self {
        let capacity = config.floored_capacity() as usize;
        let num_data_fragments = MIN_FRAGMENTS;
        let per_fragment = capacity.div_ceil(num_data_fragments);
        let fragment_size = per_fragment.clamp(1, MAX_PER_FRAGMENT);
        let num_fragments = num_data_fragments + OVERFLOW_CUSHION;

        let fragments = (0..num_fragments)
            .map(|_| Atomic::null())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            fragments,
            fragment_size,
            num_fragments,
            next_free_seq: CachePadded::new(AtomicU64::new(0)),
            min_seq: CachePadded::new(AtomicU64::new(0)),
            min_mapping_id: CachePadded::new(AtomicU64::new(0)),
            max_mapping: Atomic::null(),
            trace_prefix: config.trace_prefix,
        }
    }

    /// The computed slot count per fragment.
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// `F + 1`, including the overflow cushion slot.
    pub fn fragment_count(&self) -> usize {
        self.num_fragments
    }

    /// The most recently appended mapping, best-effort: written with
    /// `Relaxed` ordering for observation and tracing only, never consulted
    /// by any correctness-sensitive path.
    pub fn max_mapping(&self) -> Option<M> {
        let guard = &epoch::pin();
        let shared = self.max_mapping.load(Ordering::Relaxed, guard);
        unsafe { shared.as_ref() }.cloned()
    }

    /// Lower bound of still-addressable payload ids.
    pub fn min_mapping_id(&self) -> u64 {
        self.min_mapping_id.load(Ordering::Acquire)
    }

    fn fragment_coordinates(&self, seq: u64) -> (u64, usize, usize) {
        let fragment_size = self.fragment_size as u64;
        let fragment_num = seq / fragment_size;
        let ring_index = (fragment_num % self.num_fragments as u64) as usize;
        let slot_index = (seq % fragment_size) as usize;
        (fragment_num, ring_index, slot_index)
    }

    fn seq_of(&self, fragment_num: u64, slot_index: usize) -> u64 {
        fragment_num * self.fragment_size as u64 + slot_index as u64
    }

    fn publish_max_mapping(&self, mapping: M, guard: &Guard) {
        let new = Owned::new(mapping).into_shared(guard);
        let old = self.max_mapping.swap(new, Ordering::Relaxed, guard);
        if !old.is_null() {
            // SAFETY: `old` has just been unlinked by this swap; no other
            // thread holds a reference to the cell that produced it, since
            // `max_mapping` only ever holds one live value at a time and
            // every reader re-loads it under its own guard before cloning.
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// `Append(mapping) -> seq`. Never fails; retries internally on
    /// contention. Safe under unbounded concurrent callers.
    ///
    /// Three cases are tried in order on every iteration of the retry loop:
    /// install a new fragment, wait for another producer's installation to
    /// land, or publish into the current fragment.
    pub fn append(&self, mapping: M) -> u64 {
        let guard = &epoch::pin();
        let mut backoff = Backoff::new();

        loop {
            let seq = self.next_free_seq.load(Ordering::Acquire);
            let (fragment_num, ring_index, slot_index) = self.fragment_coordinates(seq);
            let current = self.fragments[ring_index].load(Ordering::Acquire, guard);
            let current_ref = unsafe { current.as_ref() };

            let is_absent_or_stale = match current_ref {
                None => true,
                Some(f) => f.fragment_num() < fragment_num,
            };

            if is_absent_or_stale && slot_index == 0 {
                if self.try_install_fragment(
                    fragment_num,
                    ring_index,
                    current,
                    current_ref,
                    mapping.clone(),
                    guard,
                ) {
                    return self.seq_of(fragment_num, 0);
                }
                backoff.snooze();
                continue;
            }

            if is_absent_or_stale {
                // Case 2: another producer owns the installation of this
                // fragment; it has not completed yet. Short spin and retry.
                backoff.snooze();
                continue;
            }

            // Case 3: the slot holds the fragment we expect to write into.
            let fragment = current_ref.expect("current is non-null when not absent_or_stale");
            debug_assert_ring_residency!(fragment.fragment_num(), self.num_fragments, ring_index);

            let mut published = None;
            for i in slot_index..self.fragment_size {
                if fragment.publish_at(i, mapping.clone()) {
                    published = Some(i);
                    break;
                }
            }

            match published {
                Some(i) => {
                    fragment.bump_length();
                    self.publish_max_mapping(mapping.clone(), guard);
                    let old_seq = seq;
                    self.next_free_seq.fetch_add(1, Ordering::AcqRel);
                    debug_assert_seq_monotonic!(old_seq, old_seq + 1);
                    return self.seq_of(fragment_num, i);
                }
                None => {
                    // A faster producer filled every remaining slot first.
                    backoff.snooze();
                }
            }
        }
    }

    /// Attempts case 1 of the Appender algorithm: installing a brand new
    /// fragment at `ring_index`. Returns whether the CAS won.
    #[allow(clippy::too_many_arguments)]
    fn try_install_fragment<'g>(
        &self,
        fragment_num: u64,
        ring_index: usize,
        current: Shared<'g, Fragment<M>>,
        current_ref: Option<&'g Fragment<M>>,
        mapping: M,
        guard: &'g Guard,
    ) -> bool {
        let min_seq_new = self.seq_of(fragment_num, 0);
        let max_seq_new = self.seq_of(fragment_num, self.fragment_size - 1);
        let new_fragment = Owned::new(Fragment::new(
            fragment_num,
            self.fragment_size,
            min_seq_new,
            max_seq_new,
        ));
        new_fragment.publish_at(0, mapping.clone());

        match self.fragments[ring_index].compare_exchange(
            current,
            new_fragment,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(installed) => {
                let installed_ref =
                    unsafe { installed.as_ref() }.expect("just installed a non-null fragment");
                installed_ref.bump_length();
                self.publish_max_mapping(mapping.clone(), guard);

                if let Some(displaced) = current_ref {
                    let displaced_last_id = displaced.max_value().unwrap_or(0);
                    let old_min_seq = self.min_seq.load(Ordering::Relaxed);
                    let new_min_seq = displaced.max_seq() + 1;
                    self.min_seq.store(new_min_seq, Ordering::Release);
                    debug_assert_watermark_monotonic!("minSeq", old_min_seq, new_min_seq);

                    let old_min_id = self.min_mapping_id.load(Ordering::Relaxed);
                    self.min_mapping_id.store(displaced_last_id, Ordering::Release);
                    debug_assert_watermark_monotonic!("minMappingId", old_min_id, displaced_last_id);

                    // SAFETY: `current` has just been unlinked by the CAS
                    // above; any reader still traversing it holds its own
                    // epoch guard and will be allowed to finish before
                    // reclamation runs.
                    unsafe { guard.defer_destroy(current) };
                } else if ring_index == 0 {
                    self.min_mapping_id.store(mapping.id(), Ordering::Release);
                }

                let old_seq = self.next_free_seq.load(Ordering::Relaxed);
                self.next_free_seq.fetch_add(1, Ordering::AcqRel);
                debug_assert_seq_monotonic!(old_seq, old_seq + 1);
                true
            }
            Err(_) => false,
        }
    }

    /// `Read(cursor) -> MessageBatch`. Resolves the cursor against the
    /// current fragment layout: up to date, inside the fragment that covers
    /// it, or stale enough to require overrun recovery.
    pub fn read(&self, cursor: u64) -> MessageBatch<M> {
        let guard = &epoch::pin();
        let tip = self.next_free_seq.load(Ordering::Acquire);

        // Case A: up-to-date.
        if tip <= cursor {
            return MessageBatch::empty(cursor);
        }

        let (fragment_num, ring_index, slot_index) = self.fragment_coordinates(cursor);
        let current = self.fragments[ring_index].load(Ordering::Acquire, guard);
        if let Some(fragment) = unsafe { current.as_ref() } {
            if fragment.fragment_num() == fragment_num {
                let frag_start = self.seq_of(fragment.fragment_num(), 0);
                let frag_end_exclusive = frag_start + self.fragment_size as u64;
                if frag_start <= cursor && cursor < frag_end_exclusive {
                    // Case B: in window.
                    let next_fragment_start = self.seq_of(fragment.fragment_num() + 1, 0);
                    let upper = tip.min(next_fragment_start);
                    let count = upper.saturating_sub(cursor) as usize;
                    let messages = fragment.snapshot(slot_index, count);
                    return MessageBatch {
                        next_cursor: cursor,
                        messages,
                        has_more: tip > next_fragment_start,
                    };
                }
            }
        }

        // Case C: overrun.
        self.read_overrun(tip, guard)
    }

    fn read_overrun(&self, mut tip: u64, guard: &Guard) -> MessageBatch<M> {
        let mut backoff = Backoff::new();
        loop {
            let (tip_fragment_num, tip_ring_index, _) = self.fragment_coordinates(tip);
            let tail_ring_index = (tip_ring_index + 1) % self.num_fragments;
            let tail = self.fragments[tail_ring_index].load(Ordering::Acquire, guard);

            if let Some(tail_fragment) = unsafe { tail.as_ref() } {
                if tail_fragment.fragment_num() < tip_fragment_num {
                    let length = tail_fragment.length();
                    let messages = tail_fragment.snapshot(0, length);
                    let next_cursor = self.seq_of(tail_fragment.fragment_num(), 0);
                    self.trace_slow_path("overrun recovered via oldest surviving fragment", None);
                    return MessageBatch {
                        next_cursor,
                        messages,
                        has_more: true,
                    };
                }
            }

            // The ring has not yet wrapped far enough to produce a valid
            // tail (e.g. it is still being populated). Bounded so an
            // empty/not-yet-wrapped ring still returns an empty batch rather
            // than spinning forever.
            if backoff.is_completed() {
                self.trace_slow_path("overrun retry exhausted against a not-yet-wrapped ring", None);
                return MessageBatch::empty(tip);
            }
            backoff.snooze();
            tip = self.next_free_seq.load(Ordering::Acquire);
        }
    }

    /// `ReadSinceMappingId(id) -> MessageBatch`. Resolves a payload id to
    /// the sequence number just past it and delegates to [`Ring::read`].
    pub fn read_since_mapping_id(&self, id: u64) -> MessageBatch<M> {
        let guard = &epoch::pin();
        let min_mapping_id = self.min_mapping_id.load(Ordering::Acquire);

        if id <= min_mapping_id {
            return self.get_all_messages(guard);
        }

        match self.binary_search_by_id(id, guard) {
            Some(shared) => {
                let fragment = unsafe { shared.as_ref() }.expect("binary search returns non-null");
                match fragment.try_search(id) {
                    Some(idx) => {
                        let next_seq = self.seq_of(fragment.fragment_num(), idx) + 1;
                        self.read(next_seq)
                    }
                    None => {
                        // The outer search matched this fragment's [min, max]
                        // range, but the id is not actually present (a gap
                        // in producer ids). Classified as expired even
                        // though the fragment itself is still live.
                        self.trace_slow_path(
                            "mapping id expired: outer range match, inner search missed",
                            Some(id),
                        );
                        self.get_all_messages(guard)
                    }
                }
            }
            None => {
                self.trace_slow_path("mapping id ahead of current view", Some(id));
                MessageBatch::empty(self.next_free_seq.load(Ordering::Acquire))
            }
        }
    }

    /// Ring binary search by mapping id. `HasValue` is a range check
    /// (`min_value <= id <= max_value`), not an exact-match search — that
    /// asymmetry with `Fragment::try_search` is exactly what produces the
    /// "expired" classification in `read_since_mapping_id`.
    fn binary_search_by_id<'g>(&self, id: u64, guard: &'g Guard) -> Option<Shared<'g, Fragment<M>>> {
        let mut low = self.min_seq.load(Ordering::Acquire);
        let mut high = self.next_free_seq.load(Ordering::Acquire);

        loop {
            if low > high {
                return None;
            }
            let mid = low + (high - low) / 2;
            let (_, ring_index, _) = self.fragment_coordinates(mid);
            let shared = self.fragments[ring_index].load(Ordering::Acquire, guard);
            let fragment = unsafe { shared.as_ref() }?;

            let min_value = fragment.min_value()?;
            let max_value = fragment.max_value()?;

            if id < min_value {
                if fragment.min_seq() == 0 {
                    return None;
                }
                high = fragment.min_seq() - 1;
            } else if id > max_value {
                low = fragment.max_seq() + 1;
            } else {
                return Some(shared);
            }
        }
    }

    fn get_all_messages(&self, guard: &Guard) -> MessageBatch<M> {
        let min_seq = self.min_seq.load(Ordering::Acquire);
        let (_, ring_index, _) = self.fragment_coordinates(min_seq);
        let shared = self.fragments[ring_index].load(Ordering::Acquire, guard);
        match unsafe { shared.as_ref() } {
            Some(fragment) => {
                let length = fragment.length();
                let messages = fragment.snapshot(0, length);
                MessageBatch {
                    next_cursor: min_seq,
                    messages,
                    has_more: true,
                }
            }
            // An empty batch here can be misread by callers as "caught up"
            // when the ring is in fact still warming up.
            None => MessageBatch::empty(min_seq),
        }
    }

    fn trace_slow_path(&self, message: &str, mapping_id: Option<u64>) {
        match (&self.trace_prefix, mapping_id) {
            (Some(prefix), Some(id)) => tracing::debug!(prefix = %prefix, mapping_id = id, "{message}"),
            (Some(prefix), None) => tracing::debug!(prefix = %prefix, "{message}"),
            (None, Some(id)) => tracing::debug!(mapping_id = id, "{message}"),
            (None, None) => tracing::debug!("{message}"),
        }
    }
}

impl<M: Mapping> Drop for Ring<M> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can be concurrently
        // pinning an epoch against this ring, so it is sound to bypass the
        // deferred-reclamation machinery and drop everything directly.
        unsafe {
            let guard = epoch::unprotected();
            for fragment in self.fragments.iter() {
                let shared = fragment.load(Ordering::Relaxed, guard);
                if !shared.is_null() {
                    drop(shared.into_owned());
                }
            }
            let max = self.max_mapping.load(Ordering::Relaxed, guard);
            if !max.is_null() {
                drop(max.into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Msg(u64);

    impl Mapping for Msg {
        fn id(&self) -> u64 {
            self.0
        }
    }

    fn small_ring() -> Ring<Msg> {
        // capacity = 16 -> 4 data fragments of size 4, 5 ring slots (F+1).
        Ring::new(16)
    }

    #[test]
    fn fragment_sizing_matches_scenario_in_spec() {
        let ring = small_ring();
        assert_eq!(ring.fragment_size(), 4);
        assert_eq!(ring.fragment_count(), 5);
    }

    #[test]
    fn s1_append_then_read_from_zero() {
        let ring = small_ring();
        for id in [10, 20, 30, 40] {
            ring.append(Msg(id));
        }
        let batch = ring.read(0);
        assert_eq!(batch.messages, vec![Msg(10), Msg(20), Msg(30), Msg(40)]);
        assert!(!batch.has_more);
    }

    #[test]
    fn s2_read_partway_into_fragment() {
        let ring = small_ring();
        for id in [10, 20, 30, 40] {
            ring.append(Msg(id));
        }
        let batch = ring.read(2);
        assert_eq!(batch.messages, vec![Msg(30), Msg(40)]);
        assert!(!batch.has_more);
    }

    #[test]
    fn s3_read_across_fragment_boundary() {
        let ring = small_ring();
        for id in [10, 20, 30, 40] {
            ring.append(Msg(id));
        }
        for id in [50, 60, 70, 80] {
            ring.append(Msg(id));
        }
        let batch = ring.read(3);
        assert_eq!(batch.messages, vec![Msg(40)]);
        assert!(batch.has_more);

        let follow_up = ring.read(4);
        assert_eq!(
            follow_up.messages,
            vec![Msg(50), Msg(60), Msg(70), Msg(80)]
        );
    }

    #[test]
    fn s4_wraparound_triggers_overrun_recovery() {
        let ring = small_ring();
        for id in (10..=300).step_by(10) {
            ring.append(Msg(id));
        }
        let batch = ring.read(0);
        assert!(batch.has_more);
        assert_eq!(batch.messages.len(), 4);
        // The returned batch must be the oldest surviving fragment, whose
        // cursor is now far ahead of 0.
        assert!(batch.next_cursor > 0);
    }

    #[test]
    fn s6_read_since_mapping_id_hit() {
        let ring = small_ring();
        for id in [10, 20, 30, 40] {
            ring.append(Msg(id));
        }
        let batch = ring.read_since_mapping_id(20);
        assert_eq!(batch.messages, vec![Msg(30), Msg(40)]);
        assert!(!batch.has_more);
    }

    #[test]
    fn s5_read_since_mapping_id_expired_after_wraparound() {
        let ring = small_ring();
        for id in (10..=300).step_by(10) {
            ring.append(Msg(id));
        }
        let batch = ring.read_since_mapping_id(30);
        assert!(batch.has_more);
        assert!(!batch.messages.is_empty());
    }

    #[test]
    fn read_at_tip_is_empty() {
        let ring = small_ring();
        ring.append(Msg(10));
        let batch = ring.read(1);
        assert!(batch.messages.is_empty());
        assert!(!batch.has_more);
    }

    #[test]
    fn read_on_empty_ring_returns_empty_batch() {
        let ring: Ring<Msg> = small_ring();
        let batch = ring.read(0);
        assert!(batch.messages.is_empty());
        assert!(!batch.has_more);
    }

    #[test]
    fn append_returns_unique_sequence_numbers() {
        let ring = small_ring();
        let mut seqs: Vec<u64> = (0..40).map(|i| ring.append(Msg(i))).collect();
        let before_sort = seqs.clone();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), before_sort.len());
    }

    #[test]
    fn max_mapping_tracks_last_append() {
        let ring = small_ring();
        ring.append(Msg(10));
        ring.append(Msg(20));
        assert_eq!(ring.max_mapping().map(|m| m.0), Some(20));
    }

    #[test]
    fn min_mapping_id_advances_after_wraparound() {
        let ring = small_ring();
        assert_eq!(ring.min_mapping_id(), 0);
        for id in (10..=300).step_by(10) {
            ring.append(Msg(id));
        }
        assert!(ring.min_mapping_id() > 0);
    }

    #[test]
    fn concurrent_producers_get_unique_sequence_numbers() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(Ring::<Msg>::new(1024));
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                (0..500)
                    .map(|i| ring.append(Msg(t * 10_000 + i)))
                    .collect::<Vec<_>>()
            }));
        }
        let mut all_seqs = Vec::new();
        for h in handles {
            all_seqs.extend(h.join().unwrap());
        }
        let total = all_seqs.len();
        all_seqs.sort_unstable();
        all_seqs.dedup();
        assert_eq!(all_seqs.len(), total);
    }
}
