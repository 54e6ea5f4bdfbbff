//! Debug assertion macros for the ring's invariants.
//!
//! These document, and check in debug builds only, invariants that must
//! hold across every valid sequence of operations against the ring. Zero
//! overhead in release builds (`#[cfg(debug_assertions)]`).

// =============================================================================
// INV-SEQ-01: Monotone counter
// =============================================================================

/// `nextFreeSeq` never decreases.
macro_rules! debug_assert_seq_monotonic {
    ($old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-SEQ-01 violated: nextFreeSeq went from {} to {}",
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-WATERMARK-01: Watermark monotonicity
// =============================================================================

/// `minSeq` and `minMappingId` never decrease.
macro_rules! debug_assert_watermark_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-WATERMARK-01 violated: {} went from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-RING-01: Ring residency
// =============================================================================

/// Every installed fragment occupies the ring slot its fragment number maps
/// to.
macro_rules! debug_assert_ring_residency {
    ($fragment_num:expr, $num_fragments:expr, $ring_index:expr) => {
        debug_assert!(
            $fragment_num % ($num_fragments as u64) == $ring_index as u64,
            "INV-RING-01 violated: fragment {} installed at ring index {} (expected {})",
            $fragment_num,
            $ring_index,
            $fragment_num % ($num_fragments as u64)
        )
    };
}

pub(crate) use debug_assert_ring_residency;
pub(crate) use debug_assert_seq_monotonic;
pub(crate) use debug_assert_watermark_monotonic;
