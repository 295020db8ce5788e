use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A matching reply arrived after the given round-trip time.
    Delivered(Duration),
    /// No matching reply before the attempt deadline, or the send failed.
    Dropped,
    /// Another reply for a request that had already been answered.
    DuplicateReply,
}

/// One measurement, produced by a prober and consumed by the aggregator.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub target: Arc<str>,
    pub sequence: u16,
    pub sent_at: Instant,
    pub outcome: Outcome,
}
