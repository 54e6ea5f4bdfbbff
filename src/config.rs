//! Construction-time configuration for a [`Ring`](crate::Ring).

use crate::constants::MIN_CAPACITY;

/// Construction inputs for a [`Ring`](crate::Ring).
///
/// Unlike most configuration types in this family, none of these fields can
/// be rejected: `capacity` is floored rather than validated, and
/// `trace_prefix` is free-form. Construction from a `RingConfig` is
/// therefore infallible.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RingConfig {
    /// Requested logical capacity in messages. Floored to
    /// [`MIN_CAPACITY`]; actual capacity may exceed the request once rounded
    /// up to whole fragments.
    pub capacity: u32,

    /// Prefix attached to diagnostic `tracing` events emitted on the
    /// reader's slow paths. `None` disables the prefix field but never
    /// disables the events themselves.
    pub trace_prefix: Option<String>,
}

impl RingConfig {
    /// Builds a config from a requested capacity, with no trace prefix.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            trace_prefix: None,
        }
    }

    /// Attaches a trace prefix, builder-style.
    #[must_use]
    pub fn with_trace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trace_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn floored_capacity(&self) -> u32 {
        self.capacity.max(MIN_CAPACITY)
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new(MIN_CAPACITY)
    }
}
