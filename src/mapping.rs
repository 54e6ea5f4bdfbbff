//! The payload contract the ring stores.

/// An opaque payload carrying a caller-assigned, monotonically increasing
/// 64-bit id.
///
/// The ring never inspects anything about `M` beyond `id()`. Producers are
/// expected (not required) to append in non-decreasing id order; the
/// id-based read path and overrun recovery depend on this for correctness,
/// not for safety.
pub trait Mapping: Clone + Send + Sync + 'static {
    /// The caller-assigned id of this payload.
    fn id(&self) -> u64;
}
