//! The result type returned by every reader operation.

/// The result of a [`Ring::read`](crate::Ring::read) or
/// [`Ring::read_since_mapping_id`](crate::Ring::read_since_mapping_id) call.
///
/// `messages` is an owned, cloned copy of whatever the ring held at the time
/// of the call rather than a borrowed view: returning borrowed slots would
/// tie the batch's lifetime to an `epoch::Guard`, which would leak the
/// ring's internal reclamation scheme into every caller's API.
#[derive(Debug, Clone)]
pub struct MessageBatch<M> {
    /// The cursor the caller should pass to its next `read` call.
    pub next_cursor: u64,

    /// The messages recovered by this call, in ascending sequence order.
    pub messages: Vec<M>,

    /// Whether more messages are known to be available beyond this batch
    /// without making any further appends.
    pub has_more: bool,
}

impl<M> MessageBatch<M> {
    pub(crate) fn empty(next_cursor: u64) -> Self {
        Self {
            next_cursor,
            messages: Vec::new(),
            has_more: false,
        }
    }
}
