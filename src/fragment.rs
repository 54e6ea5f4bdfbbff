//! A single contiguous segment of the ring.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::mapping::Mapping;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// One slot within a fragment's backing array.
///
/// The absent-to-present transition on `data[offset]` needs to be atomic,
/// but a single boolean CAS is not sufficient: a reader that observes
/// "occupied" the instant before the value itself finishes writing would
/// read uninitialized memory. This widens the transition to three states so
/// a reader only ever dereferences a slot once the write that populated it
/// has fully completed and been published with `Release`.
struct Slot<M> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<M>>,
}

// SAFETY: `value` is only written by the single producer that wins the
// EMPTY -> WRITING transition, and only read after observing READY with
// Acquire ordering, so access is effectively single-writer-then-many-readers.
unsafe impl<M: Send> Sync for Slot<M> {}

impl<M> Slot<M> {
    fn empty() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

impl<M> Drop for Slot<M> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: state is READY, so `value` was fully initialized and
            // never moved out.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

/// A fixed-size segment of the ring: `fragmentSize` slots plus the metadata
/// needed to place it within the logical stream.
///
/// Once `data[i]` transitions from absent to present it is never mutated
/// again during this fragment's lifetime; `length` advances only upward;
/// `fragmentNum` is immutable.
pub struct Fragment<M> {
    fragment_num: u64,
    data: Box<[Slot<M>]>,
    length: AtomicUsize,
    min_seq: u64,
    max_seq: u64,
}

impl<M: Mapping> Fragment<M> {
    /// Allocates a fresh fragment of `size` absent slots at `fragment_num`,
    /// covering sequence range `[min_seq, max_seq]`.
    pub fn new(fragment_num: u64, size: usize, min_seq: u64, max_seq: u64) -> Self {
        let data = (0..size).map(|_| Slot::empty()).collect::<Vec<_>>();
        Self {
            fragment_num,
            data: data.into_boxed_slice(),
            length: AtomicUsize::new(0),
            min_seq,
            max_seq,
        }
    }

    pub fn fragment_num(&self) -> u64 {
        self.fragment_num
    }

    pub fn min_seq(&self) -> u64 {
        self.min_seq
    }

    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of slots currently populated. Incremented non-atomically
    /// relative to the CAS that claimed the slot, so a concurrent reader may
    /// see a value that lags the true published count by a handful of
    /// in-flight writers; it never overstates it.
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_length(&self) {
        self.length.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts to atomically transition `data[offset]` from absent to
    /// `mapping`. Returns `true` on success; `false` means another producer
    /// already claimed this slot, which is contention, not an error.
    ///
    /// The slot-claimed-exactly-once invariant is enforced by the CAS below:
    /// only its single winner ever observes `Ok`, so there is no separate
    /// check left to perform once we reach this point.
    pub fn publish_at(&self, offset: usize, mapping: M) -> bool {
        let slot = &self.data[offset];
        let claimed = slot
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if !claimed {
            return false;
        }
        // SAFETY: we are the sole winner of the EMPTY -> WRITING transition,
        // so no other thread may write or read `value` until we store READY.
        unsafe {
            (*slot.value.get()).write(mapping);
        }
        slot.state.store(READY, Ordering::Release);
        true
    }

    /// Reads the mapping at `offset` if that slot has been published.
    pub fn get(&self, offset: usize) -> Option<M> {
        let slot = self.data.get(offset)?;
        if slot.state.load(Ordering::Acquire) != READY {
            return None;
        }
        // SAFETY: state observed READY with Acquire, synchronizing with the
        // Release store in `publish_at`; the value is fully initialized and
        // never mutated again for this fragment's lifetime.
        Some(unsafe { (*slot.value.get()).assume_init_ref().clone() })
    }

    /// Clones out slots `[offset, offset + count)`, skipping any that have
    /// not yet been published (which can only be trailing, in-flight
    /// writes at the tip of the fragment).
    pub fn snapshot(&self, offset: usize, count: usize) -> Vec<M> {
        let end = (offset + count).min(self.data.len());
        (offset..end).filter_map(|i| self.get(i)).collect()
    }

    /// Binary search over `data[0..length)` by `Mapping::id`, assuming
    /// producers publish in non-decreasing id order. Returns the index of
    /// the first slot whose id equals `id`.
    pub fn try_search(&self, id: u64) -> Option<usize> {
        let length = self.length();
        if length == 0 {
            return None;
        }
        let mut low = 0usize;
        let mut high = length - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            let mid_id = self.get(mid)?.id();
            match mid_id.cmp(&id) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => {
                    if mid == 0 {
                        return None;
                    }
                    high = mid - 1;
                }
            }
        }
        None
    }

    /// The lowest id in this fragment, or the first slot's id if the
    /// fragment is still being populated (`length == 0` but slot 0 may
    /// already be written). Advisory only; callers must tolerate `None`.
    pub fn min_value(&self) -> Option<u64> {
        self.get(0).map(|m| m.id())
    }

    /// The highest id in this fragment so far.
    pub fn max_value(&self) -> Option<u64> {
        let length = self.length();
        if length == 0 {
            self.get(0).map(|m| m.id())
        } else {
            self.get(length - 1).map(|m| m.id())
        }
    }

    /// Whether `id` falls within `[min_value, max_value]` and is actually
    /// present in the fragment.
    pub fn has_value(&self, id: u64) -> bool {
        self.try_search(id).is_some()
    }
}
