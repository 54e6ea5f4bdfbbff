//! scaleout-ring - a bounded, append-only concurrent message store.
//!
//! A fixed-capacity, lock-free, in-memory log used to buffer recent events
//! for a horizontally-scaled real-time messaging backplane: many producers
//! append concurrently, many readers poll independently with their own
//! cursors, and under sustained load the oldest messages are silently
//! overwritten. The store trades durability for bounded memory and
//! lock-free throughput — there is no persistence, no replication, no
//! acknowledgment, and no backpressure toward producers.
//!
//! The ring is segmented into `Fragment`s, each a fixed-size array of
//! slots. Producers install and fill fragments via compare-and-swap;
//! readers resolve a cursor against the current fragment layout without
//! ever blocking.
//!
//! # Example
//!
//! ```
//! use scaleout_ring::{Mapping, Ring};
//!
//! #[derive(Clone)]
//! struct Event(u64);
//!
//! impl Mapping for Event {
//!     fn id(&self) -> u64 {
//!         self.0
//!     }
//! }
//!
//! let ring = Ring::new(1024);
//! let seq = ring.append(Event(1));
//!
//! // Reading from `seq` itself returns the message just appended there.
//! let batch = ring.read(seq);
//! assert_eq!(batch.messages.len(), 1);
//!
//! // Reading from one past it catches up to the tip: nothing more yet.
//! let caught_up = ring.read(seq + 1);
//! assert!(caught_up.messages.is_empty());
//! ```

mod backoff;
mod batch;
mod config;
mod constants;
mod fragment;
mod invariants;
mod mapping;
mod ring;

pub use backoff::Backoff;
pub use batch::MessageBatch;
pub use config::RingConfig;
pub use mapping::Mapping;
pub use ring::Ring;
