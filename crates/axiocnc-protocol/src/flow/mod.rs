//! Flow control strategies. Each firmware family paces line transmission
//! differently; realtime bytes always bypass whichever strategy is active.

pub mod grbl;
pub mod lockstep;
pub mod queue_report;

pub use grbl::CharacterCountingFlow;
pub use lockstep::LockstepFlow;
pub use queue_report::QueueReportFlow;

/// A pending line handed to the flow controller, identified so the caller
/// (Feeder or Sender) can match an *ok*/*error* back to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineId(pub u64);

/// Common contract for pacing line transmission against a firmware's
/// acknowledgment model. Implementations own no transport; the Controller
/// calls `can_send`/`on_sent`/`on_ack`/`on_nack` around its own writes.
pub trait FlowController {
    /// True if a line of `line_len` bytes (LF included) may be written now.
    fn can_send(&self, line_len: usize) -> bool;

    /// Record that a line was written; `line_len` includes the terminator.
    fn on_sent(&mut self, id: LineId, line_len: usize);

    /// An *ok* was received; returns the id of the line it acknowledges.
    fn on_ack(&mut self) -> Option<LineId>;

    /// An *error* was received; returns the id of the line it rejects.
    fn on_nack(&mut self) -> Option<LineId>;

    /// Number of lines written but not yet acknowledged.
    fn in_flight(&self) -> usize;

    /// Drop all pending bookkeeping, e.g. after a soft reset.
    fn reset(&mut self);

    /// Record a self-reported queue depth. No-op for strategies that don't
    /// pace against one; only [`QueueReportFlow`] overrides it.
    fn on_queue_report(&mut self, _qr: u32) {}
}
