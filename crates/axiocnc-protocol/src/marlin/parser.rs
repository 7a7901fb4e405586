//! Marlin line parser: unlike Grbl, Marlin has no unsolicited `?` status
//! report. Position comes back only in reply to an `M114` query, paired
//! with the busy/idle state inferred from `echo:busy` lines.

use crate::parser::{FirmwareParser, ParserEvent};
use axiocnc_core::data::PartialPosition;

#[derive(Debug, Default)]
pub struct MarlinParser {
    last_status: Option<ParserEvent>,
    busy: bool,
}

impl MarlinParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> ParserEvent {
        let event = if line == "ok" || line.starts_with("ok ") {
            ParserEvent::Ok
        } else if let Some(rest) = line.strip_prefix("Error:") {
            ParserEvent::Error {
                code: 0,
                description: rest.trim().to_string(),
            }
        } else if line.starts_with("echo:busy") {
            self.busy = true;
            ParserEvent::Message { text: line.to_string() }
        } else if is_position_report(line) {
            let event = parse_position_report(line, self.busy);
            self.busy = false;
            event
        } else if line.starts_with("Marlin") {
            ParserEvent::Welcome {
                name: "Marlin".to_string(),
                version: line.trim_start_matches("Marlin").trim().to_string(),
            }
        } else if line == "start" {
            ParserEvent::Startup { line: line.to_string() }
        } else {
            ParserEvent::Message { text: line.to_string() }
        };

        if let ParserEvent::Status { .. } = &event {
            self.last_status = Some(event.clone());
        }
        event
    }

    pub fn last_status(&self) -> Option<&ParserEvent> {
        self.last_status.as_ref()
    }
}

impl FirmwareParser for MarlinParser {
    fn parse_line(&mut self, line: &str) -> ParserEvent {
        MarlinParser::parse_line(self, line)
    }

    fn last_status(&self) -> Option<&ParserEvent> {
        MarlinParser::last_status(self)
    }
}

/// `M114`'s reply looks like `X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0`;
/// only the axis letters before the `Count` section are machine position in
/// millimeters, the ones after are step counts.
fn is_position_report(line: &str) -> bool {
    line.contains("X:") && line.contains("Y:") && line.contains("Z:")
}

fn parse_position_report(line: &str, busy: bool) -> ParserEvent {
    let mut mpos = PartialPosition::default();
    for token in line.split_whitespace() {
        if token == "Count" {
            break;
        }
        if let Some(value) = token.strip_prefix("X:").and_then(|v| v.parse::<f64>().ok()) {
            mpos.x = Some(value);
        } else if let Some(value) = token.strip_prefix("Y:").and_then(|v| v.parse::<f64>().ok()) {
            mpos.y = Some(value);
        } else if let Some(value) = token.strip_prefix("Z:").and_then(|v| v.parse::<f64>().ok()) {
            mpos.z = Some(value);
        }
    }
    ParserEvent::Status {
        state: if busy { "Run".to_string() } else { "Idle".to_string() },
        mpos: Some(mpos),
        wpos: None,
        feedrate: None,
        spindle_speed: None,
        buffer: None,
        pins: None,
        overrides: None,
        wcs: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_line_parses_to_ok_event() {
        let mut parser = MarlinParser::new();
        assert_eq!(parser.parse_line("ok"), ParserEvent::Ok);
    }

    #[test]
    fn error_line_carries_its_message_verbatim() {
        let mut parser = MarlinParser::new();
        match parser.parse_line("Error:Printer halted. kill() called!") {
            ParserEvent::Error { description, .. } => {
                assert_eq!(description, "Printer halted. kill() called!");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn position_report_ignores_the_step_count_section() {
        let mut parser = MarlinParser::new();
        match parser.parse_line("X:1.50 Y:2.50 Z:3.50 E:0.00 Count X:1500 Y:2500 Z:3500") {
            ParserEvent::Status { mpos, .. } => {
                let mpos = mpos.unwrap();
                assert_eq!(mpos.x, Some(1.50));
                assert_eq!(mpos.z, Some(3.50));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn busy_echo_marks_the_next_position_report_running() {
        let mut parser = MarlinParser::new();
        parser.parse_line("echo:busy: processing");
        match parser.parse_line("X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0") {
            ParserEvent::Status { state, .. } => assert_eq!(state, "Run"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn welcome_line_parses_version() {
        let mut parser = MarlinParser::new();
        match parser.parse_line("Marlin bugfix-2.1.2") {
            ParserEvent::Welcome { name, version } => {
                assert_eq!(name, "Marlin");
                assert_eq!(version, "bugfix-2.1.2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
