//! Sizing constants governing fragment and ring dimensions.
//!
//! A ring is always carved into `MIN_FRAGMENTS` fragments plus one overflow
//! cushion slot; `fragmentSize` falls out of dividing the floored capacity
//! across those fragments.

/// Requested capacity below this is floored up to it.
pub const MIN_CAPACITY: u32 = 16;

/// Minimum number of fragments the ring allocates, not counting the
/// overflow cushion slot.
pub const MIN_FRAGMENTS: usize = 4;

/// The ring always allocates one extra fragment slot beyond `MIN_FRAGMENTS`
/// (or whatever fragment count is chosen) to smooth contention on rotation.
pub const OVERFLOW_CUSHION: usize = 1;

/// Largest slot count a single fragment may have on a 64-bit target, chosen
/// to stay below the platform's large-allocation threshold.
#[cfg(target_pointer_width = "64")]
pub const MAX_PER_FRAGMENT: usize = 8192;

/// Largest slot count a single fragment may have on a 32-bit target.
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_PER_FRAGMENT: usize = 16384;
