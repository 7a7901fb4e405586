//! Whole-program streaming: pre-indexed tool changes and optional-stop
//! points, counters the Controller reports as `sender:status`, and the
//! auto-pause policy that halts at M0/M1/M6 boundaries.

use crate::template;
use axiocnc_core::error::FeederError;
use axiocnc_core::workflow::{HoldReason, WorkflowState, WorkflowTransition, WorkflowTransitionError};
use axiocnc_protocol::codec::strip_comment;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellKind {
    OptionalStop, // M1
    ProgramStop,  // M0
    ProgramEnd,   // M2 / M30
}

#[derive(Debug, Clone)]
struct LoadedProgram {
    name: String,
    lines: Vec<String>,      // comment-stripped, template-expanded, ready to send
    originals: Vec<String>,  // as-loaded, for display/re-download
    total: usize,            // count of non-blank lines actually sent
    tool_changes: Vec<(usize, Option<u32>)>,
    dwell_points: Vec<(usize, DwellKind)>,
}

#[derive(Debug)]
pub struct Sender {
    program: Option<LoadedProgram>,
    workflow: WorkflowState,
    /// Position in `program.lines` still to be scanned; advances over every
    /// raw line, blank or not.
    next_index: usize,
    /// Count of non-blank lines actually handed to the Flow Controller —
    /// comparable to `total`, which counts the same set.
    sent: usize,
    received: usize,
    pending_pause_after: Option<usize>,
    ignore_errors: bool,
    start_time: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    time_paused: ChronoDuration,
}

impl Default for Sender {
    fn default() -> Self {
        Self {
            program: None,
            workflow: WorkflowState::Idle,
            next_index: 0,
            sent: 0,
            received: 0,
            pending_pause_after: None,
            ignore_errors: false,
            start_time: None,
            paused_at: None,
            time_paused: ChronoDuration::zero(),
        }
    }
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ignore_errors(&mut self, ignore: bool) {
        self.ignore_errors = ignore;
    }

    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    /// Pre-process a program in one pass: strip comments for sending (the
    /// original is retained), evaluate macro templates against `context`,
    /// and build the tool-change and dwell indices.
    pub fn load(&mut self, name: impl Into<String>, text: &str, context: &serde_json::Value) -> Result<(), FeederError> {
        let name = name.into();
        let mut lines = Vec::new();
        let mut originals = Vec::new();
        let mut tool_changes = Vec::new();
        let mut dwell_points = Vec::new();

        for (index, original) in text.lines().enumerate() {
            originals.push(original.to_string());
            let Some(stripped) = strip_comment(original) else {
                lines.push(String::new());
                continue;
            };
            let expanded = template::expand(&stripped, context).map_err(|reason| FeederError {
                line_id: Some(index as u64),
                reason,
            })?;
            if let Some(tool) = find_tool_number(&expanded) {
                tool_changes.push((index, Some(tool)));
            } else if contains_word(&expanded, "M6") {
                tool_changes.push((index, None));
            }
            if contains_word(&expanded, "M0") {
                dwell_points.push((index, DwellKind::ProgramStop));
            } else if contains_word(&expanded, "M1") {
                dwell_points.push((index, DwellKind::OptionalStop));
            } else if contains_word(&expanded, "M2") || contains_word(&expanded, "M30") {
                dwell_points.push((index, DwellKind::ProgramEnd));
            }
            lines.push(expanded);
        }

        let total = lines.iter().filter(|l| !l.is_empty()).count();
        self.program = Some(LoadedProgram {
            name,
            lines,
            originals,
            total,
            tool_changes,
            dwell_points,
        });
        self.next_index = 0;
        self.sent = 0;
        self.received = 0;
        Ok(())
    }

    pub fn unload(&mut self) {
        self.program = None;
        self.next_index = 0;
        self.sent = 0;
        self.received = 0;
        self.workflow = WorkflowState::Idle;
    }

    pub fn is_loaded(&self) -> bool {
        self.program.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.program.as_ref().map(|p| p.name.as_str())
    }

    pub fn total(&self) -> usize {
        self.program.as_ref().map_or(0, |p| p.total)
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn workflow(&self) -> &WorkflowState {
        &self.workflow
    }

    pub fn start(&mut self) -> Result<(), WorkflowTransitionError> {
        if !self.is_loaded() {
            return Err(WorkflowTransitionError::Invalid {
                from: self.workflow.clone(),
                transition: WorkflowTransition::Start,
            });
        }
        self.workflow = self.workflow.clone().apply(WorkflowTransition::Start, None)?;
        self.start_time = Some(Utc::now());
        self.time_paused = ChronoDuration::zero();
        Ok(())
    }

    pub fn pause(&mut self, reason: HoldReason) -> Result<(), WorkflowTransitionError> {
        self.workflow = self
            .workflow
            .clone()
            .apply(WorkflowTransition::Pause, Some(reason))?;
        self.paused_at = Some(Utc::now());
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), WorkflowTransitionError> {
        self.workflow = self.workflow.clone().apply(WorkflowTransition::Resume, None)?;
        if let Some(paused_at) = self.paused_at.take() {
            self.time_paused = self.time_paused + (Utc::now() - paused_at);
        }
        Ok(())
    }

    /// Resets counters to zero but keeps `name`/`total`/`data` so a client
    /// can restart without re-uploading.
    pub fn stop(&mut self) -> Result<(), WorkflowTransitionError> {
        self.workflow = self.workflow.clone().apply(WorkflowTransition::Stop, None)?;
        self.next_index = 0;
        self.sent = 0;
        self.received = 0;
        self.pending_pause_after = None;
        self.start_time = None;
        self.paused_at = None;
        self.time_paused = ChronoDuration::zero();
        Ok(())
    }

    /// Upper bound on the wire length of the next unsent line (LF included),
    /// so the Controller can check Flow Controller capacity before popping it.
    pub fn peek_len(&self) -> Option<usize> {
        if !matches!(self.workflow, WorkflowState::Running) || self.pending_pause_after.is_some() {
            return None;
        }
        self.program.as_ref()?.lines.get(self.next_index).map(|l| l.len() + 1)
    }

    /// Next line to hand to the Flow Controller, or `None` if not running,
    /// the program is exhausted, or an auto-pause is still draining. Blank
    /// and comment-only lines are skipped without being sent or counted —
    /// `sent`/`total` both count only lines that actually reach the wire.
    pub fn next_to_send(&mut self) -> Option<(usize, String)> {
        if !matches!(self.workflow, WorkflowState::Running) || self.pending_pause_after.is_some() {
            return None;
        }
        let program = self.program.as_ref()?;
        loop {
            let index = self.next_index;
            let line = program.lines.get(index)?.clone();
            self.next_index += 1;
            if line.is_empty() {
                continue;
            }
            self.sent += 1;
            if program.dwell_points.iter().any(|(i, _)| *i == index)
                || program.tool_changes.iter().any(|(i, _)| *i == index)
            {
                self.pending_pause_after = Some(index);
            }
            return Some((index, line));
        }
    }

    /// The controller calls this on every *ok*. Returns the auto-pause
    /// reason once the boundary line has fully drained.
    pub fn record_ok(&mut self, line_id: usize) -> Option<HoldReason> {
        self.received += 1;
        if self.pending_pause_after == Some(line_id) && self.received == self.sent {
            self.pending_pause_after = None;
            let program = self.program.as_ref()?;
            let reason = if let Some((_, kind)) =
                program.dwell_points.iter().find(|(i, _)| *i == line_id)
            {
                let data = match kind {
                    DwellKind::ProgramStop => "M0",
                    DwellKind::OptionalStop => "M1",
                    DwellKind::ProgramEnd => "M30",
                };
                HoldReason::program_stop(data, comment_on_line(program, line_id))
            } else {
                HoldReason::program_stop("M6", comment_on_line(program, line_id))
            };
            let _ = self.pause(reason.clone());
            return Some(reason);
        }
        None
    }

    pub fn next_m6_tool_number(&self) -> Option<u32> {
        let program = self.program.as_ref()?;
        program
            .tool_changes
            .iter()
            .find(|(i, _)| *i >= self.next_index)
            .and_then(|(_, tool)| *tool)
    }

    pub fn elapsed(&self) -> Option<ChronoDuration> {
        let start = self.start_time?;
        let raw = Utc::now() - start - self.time_paused;
        Some(raw.max(ChronoDuration::zero()))
    }

    pub fn remaining_estimate(&self) -> Option<ChronoDuration> {
        let elapsed = self.elapsed()?;
        if self.sent == 0 {
            return None;
        }
        let total = self.total() as i64;
        let per_line = elapsed / self.sent as i32;
        Some(per_line * (total - self.sent as i64) as i32)
    }
}

fn find_tool_number(line: &str) -> Option<u32> {
    let upper = line.to_ascii_uppercase();
    let t_index = upper.find('T')?;
    let digits: String = upper[t_index + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn contains_word(line: &str, word: &str) -> bool {
    line.to_ascii_uppercase().split_whitespace().any(|tok| tok == word)
}

fn comment_on_line(program: &LoadedProgram, index: usize) -> Option<String> {
    let original = program.originals.get(index)?;
    let start = original.find('(')?;
    let end = original[start..].find(')')? + start;
    Some(original[start + 1..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_builds_tool_change_and_dwell_indices() {
        let mut sender = Sender::new();
        sender
            .load("job.nc", "G0 X0\nT3 M6\nG0 Y0\nM30", &json!({}))
            .unwrap();
        assert_eq!(sender.next_m6_tool_number(), Some(3));
    }

    #[test]
    fn start_requires_a_loaded_program() {
        let mut sender = Sender::new();
        assert!(sender.start().is_err());
    }

    #[test]
    fn auto_pause_fires_after_tool_change_line_drains() {
        let mut sender = Sender::new();
        sender.load("job.nc", "G0 X0\nT3 M6\nG0 Y0", &json!({})).unwrap();
        sender.start().unwrap();

        let (id0, _) = sender.next_to_send().unwrap();
        assert!(sender.record_ok(id0).is_none());

        let (id1, _) = sender.next_to_send().unwrap();
        assert!(sender.next_to_send().is_none()); // pending pause blocks further sends
        let reason = sender.record_ok(id1).unwrap();
        assert_eq!(reason.data.as_deref(), Some("M6"));
        assert!(sender.workflow().is_paused());
    }

    #[test]
    fn stop_resets_counters_but_keeps_program_metadata() {
        let mut sender = Sender::new();
        sender.load("job.nc", "G0 X0\nG0 Y0", &json!({})).unwrap();
        sender.start().unwrap();
        sender.next_to_send();
        sender.stop().unwrap();
        assert_eq!(sender.sent(), 0);
        assert_eq!(sender.name(), Some("job.nc"));
    }

    #[test]
    fn unload_clears_the_program_entirely() {
        let mut sender = Sender::new();
        sender.load("job.nc", "G0 X0", &json!({})).unwrap();
        sender.unload();
        assert!(!sender.is_loaded());
        assert_eq!(sender.name(), None);
    }

    #[test]
    fn blank_and_comment_only_lines_are_never_counted_as_sent() {
        let mut sender = Sender::new();
        sender.load("job.nc", "G0 X0\n(comment)\nG0 Y0", &json!({})).unwrap();
        assert_eq!(sender.total(), 2);
        sender.start().unwrap();

        let (id0, _) = sender.next_to_send().unwrap();
        assert_eq!(sender.sent(), 1);
        sender.record_ok(id0);

        let (id1, _) = sender.next_to_send().unwrap();
        assert_eq!(sender.sent(), 2);
        sender.record_ok(id1);

        assert!(sender.next_to_send().is_none());
        assert_eq!(sender.sent(), sender.total());
        assert_eq!(sender.received(), sender.sent());
    }
}
