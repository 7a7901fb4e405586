//! Lock-step flow control for Marlin/Smoothieware: at most one
//! unacknowledged line outstanding at any time.

use super::{FlowController, LineId};

#[derive(Debug, Default)]
pub struct LockstepFlow {
    outstanding: Option<LineId>,
}

impl LockstepFlow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowController for LockstepFlow {
    fn can_send(&self, _line_len: usize) -> bool {
        self.outstanding.is_none()
    }

    fn on_sent(&mut self, id: LineId, _line_len: usize) {
        self.outstanding = Some(id);
    }

    fn on_ack(&mut self) -> Option<LineId> {
        self.outstanding.take()
    }

    fn on_nack(&mut self) -> Option<LineId> {
        self.outstanding.take()
    }

    fn in_flight(&self) -> usize {
        usize::from(self.outstanding.is_some())
    }

    fn reset(&mut self) {
        self.outstanding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_line_is_blocked_until_first_is_acked() {
        let mut flow = LockstepFlow::new();
        assert!(flow.can_send(1));
        flow.on_sent(LineId(1), 10);
        assert!(!flow.can_send(1));
        flow.on_ack();
        assert!(flow.can_send(1));
    }

    #[test]
    fn temperature_lines_do_not_advance_the_ledger() {
        // Temperature responses aren't routed through on_ack/on_nack at all;
        // the controller only calls those for genuine acknowledgments.
        let mut flow = LockstepFlow::new();
        flow.on_sent(LineId(1), 10);
        assert_eq!(flow.in_flight(), 1);
    }
}
