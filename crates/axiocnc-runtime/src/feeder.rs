//! Ad-hoc FIFO command queue (jogging, MDI, wizard output) with macro
//! templating, distinct from the Sender's whole-program streaming.

use crate::template;
use axiocnc_core::error::FeederError;
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct FeederLine {
    pub text: String,
    pub context: Value,
    pub force: bool,
}

impl FeederLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Value::Object(serde_json::Map::new()),
            force: false,
        }
    }

    /// A system-originated line (unlock, homing) that preempts anything
    /// already queued rather than taking its turn behind it.
    pub fn priority(text: impl Into<String>) -> Self {
        Self {
            force: true,
            ..Self::new(text)
        }
    }
}

#[derive(Debug, Default)]
pub struct Feeder {
    queue: VecDeque<FeederLine>,
    held: bool,
    hold_reason: Option<String>,
}

impl Feeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `lines` for send. A line marked [`FeederLine::priority`] is
    /// inserted ahead of everything already pending instead of behind it;
    /// the relative order within a single priority batch is preserved.
    pub fn feed(&mut self, lines: impl IntoIterator<Item = FeederLine>) {
        let (priority, normal): (Vec<_>, Vec<_>) =
            lines.into_iter().partition(|line| line.force);
        for line in priority.into_iter().rev() {
            self.queue.push_front(line);
        }
        self.queue.extend(normal);
    }

    /// Upper bound on the wire length of the head line (LF included), so the
    /// Controller can check Flow Controller capacity before popping it.
    pub fn peek_len(&self) -> Option<usize> {
        if self.held {
            return None;
        }
        self.queue.front().map(|l| l.text.len() + 1)
    }

    /// Called by the Controller once the Flow Controller reports capacity.
    /// Expands the head line's template; a failing line is discarded and
    /// reported as an error, and the next line is tried immediately.
    pub fn next(&mut self) -> (Option<String>, Vec<FeederError>) {
        if self.held {
            return (None, Vec::new());
        }
        let mut errors = Vec::new();
        while let Some(line) = self.queue.pop_front() {
            match template::expand(&line.text, &line.context) {
                Ok(expanded) => return (Some(expanded), errors),
                Err(reason) => errors.push(template::to_feeder_error(reason, None)),
            }
        }
        (None, errors)
    }

    pub fn hold(&mut self, reason: impl Into<String>) {
        self.held = true;
        self.hold_reason = Some(reason.into());
    }

    pub fn unhold(&mut self) {
        self.held = false;
        self.hold_reason = None;
    }

    pub fn reset(&mut self) {
        self.queue.clear();
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn hold_reason(&self) -> Option<&str> {
        self.hold_reason.as_deref()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn held_feeder_yields_nothing() {
        let mut feeder = Feeder::new();
        feeder.feed([FeederLine::new("G0 X0")]);
        feeder.hold("user requested");
        assert_eq!(feeder.next().0, None);
    }

    #[test]
    fn unhold_resumes_dequeue() {
        let mut feeder = Feeder::new();
        feeder.feed([FeederLine::new("G0 X0")]);
        feeder.hold("paused");
        feeder.unhold();
        assert_eq!(feeder.next().0, Some("G0 X0".to_string()));
    }

    #[test]
    fn bad_macro_line_is_discarded_and_good_line_follows() {
        let mut feeder = Feeder::new();
        feeder.feed([
            FeederLine::new("G1 F{{ missing }}"),
            FeederLine::new("G0 X0"),
        ]);
        let (line, errors) = feeder.next();
        assert_eq!(line, Some("G0 X0".to_string()));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn feed_expands_context_per_line() {
        let mut feeder = Feeder::new();
        let mut line = FeederLine::new("G1 F{{ rate }}");
        line.context = json!({ "rate": 800.0 });
        feeder.feed([line]);
        assert_eq!(feeder.next().0, Some("G1 F800".to_string()));
    }

    #[test]
    fn reset_drops_all_pending_lines() {
        let mut feeder = Feeder::new();
        feeder.feed([FeederLine::new("G0 X0"), FeederLine::new("G0 Y0")]);
        feeder.reset();
        assert!(feeder.is_empty());
    }

    #[test]
    fn priority_line_preempts_already_queued_lines() {
        let mut feeder = Feeder::new();
        feeder.feed([FeederLine::new("G0 X0"), FeederLine::new("G0 Y0")]);
        feeder.feed([FeederLine::priority("$X")]);
        assert_eq!(feeder.next().0, Some("$X".to_string()));
        assert_eq!(feeder.next().0, Some("G0 X0".to_string()));
    }
}
