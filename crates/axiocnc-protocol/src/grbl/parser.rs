//! Grbl line parser: turns one received line into a [`ParserEvent`] and
//! keeps the last-seen status/settings/parser-state for on-demand reporting.

use super::error_decoder::{decode_alarm, decode_error};
use super::status_parser::StatusFields;
use crate::parser::{FirmwareParser, ParserEvent};
use axiocnc_core::data::PartialPosition;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct GrblParser {
    last_status: Option<ParserEvent>,
    last_settings: HashMap<String, String>,
    last_parser_state: Option<String>,
    last_wco: Option<PartialPosition>,
}

impl GrblParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one already-comment-and-terminator-stripped line.
    pub fn parse_line(&mut self, line: &str) -> ParserEvent {
        let event = if line == "ok" {
            ParserEvent::Ok
        } else if let Some(rest) = line.strip_prefix("error:") {
            let code = rest.trim().parse().unwrap_or(0);
            ParserEvent::Error {
                code,
                description: decode_error(code as u8),
            }
        } else if let Some(rest) = line.strip_prefix("ALARM:") {
            let code = rest.trim().parse().unwrap_or(0);
            ParserEvent::Alarm {
                code,
                description: decode_alarm(code as u8),
            }
        } else if line.starts_with('<') && line.ends_with('>') {
            self.parse_status(line)
        } else if let Some(rest) = line.strip_prefix('$') {
            self.parse_setting(rest)
        } else if line.starts_with("[GC:") {
            let modal = line
                .trim_start_matches("[GC:")
                .trim_end_matches(']')
                .to_string();
            self.last_parser_state = Some(modal.clone());
            ParserEvent::ParserState { modal }
        } else if line.starts_with("Grbl ") {
            let mut parts = line.splitn(2, ' ');
            parts.next();
            let version = parts.next().unwrap_or("").to_string();
            ParserEvent::Welcome {
                name: "Grbl".to_string(),
                version,
            }
        } else if line.starts_with('>') {
            ParserEvent::Startup {
                line: line.trim_start_matches('>').to_string(),
            }
        } else if line.starts_with('[') && line.ends_with(']') {
            let text = line[1..line.len() - 1].to_string();
            ParserEvent::Feedback { text }
        } else {
            ParserEvent::Message {
                text: line.to_string(),
            }
        };

        if let ParserEvent::Status { .. } = &event {
            self.last_status = Some(event.clone());
        }
        event
    }

    fn parse_status(&mut self, line: &str) -> ParserEvent {
        let state = StatusFields::machine_state(line)
            .unwrap_or("Unknown")
            .to_string();

        if let Some(wco) = StatusFields::wco(line) {
            self.last_wco = Some(wco);
        }

        let mut mpos = StatusFields::mpos(line);
        let mut wpos = StatusFields::wpos(line);

        // Per the derivation rule: whichever position the controller
        // reports is authoritative; the other is derived via the last
        // known work-coordinate offset. If neither can be derived, leave
        // it absent rather than guessing.
        if let Some(wco) = &self.last_wco {
            if mpos.is_none() {
                if let Some(w) = &wpos {
                    mpos = Some(add_partial(w, wco));
                }
            }
            if wpos.is_none() {
                if let Some(m) = &mpos {
                    wpos = Some(sub_partial(m, wco));
                }
            }
        }

        let buffer = StatusFields::buffer(line).map(|b| (b.plan, b.rx));

        ParserEvent::Status {
            state,
            mpos,
            wpos,
            feedrate: StatusFields::feed_rate(line),
            spindle_speed: StatusFields::spindle_speed(line),
            buffer,
            pins: StatusFields::pins(line).map(str::to_string),
            overrides: StatusFields::overrides(line),
            wcs: None,
        }
    }

    fn parse_setting(&mut self, rest: &str) -> ParserEvent {
        if let Some((key, value)) = rest.split_once('=') {
            self.last_settings
                .insert(key.trim().to_string(), value.trim().to_string());
            ParserEvent::Setting {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            }
        } else {
            ParserEvent::Other {
                raw: format!("${rest}"),
            }
        }
    }

    pub fn last_status(&self) -> Option<&ParserEvent> {
        self.last_status.as_ref()
    }

    pub fn last_settings(&self) -> &HashMap<String, String> {
        &self.last_settings
    }

    pub fn last_parser_state(&self) -> Option<&str> {
        self.last_parser_state.as_deref()
    }
}

impl FirmwareParser for GrblParser {
    fn parse_line(&mut self, line: &str) -> ParserEvent {
        GrblParser::parse_line(self, line)
    }

    fn last_status(&self) -> Option<&ParserEvent> {
        GrblParser::last_status(self)
    }
}

fn add_partial(a: &PartialPosition, b: &PartialPosition) -> PartialPosition {
    PartialPosition {
        x: add_opt(a.x, b.x),
        y: add_opt(a.y, b.y),
        z: add_opt(a.z, b.z),
        a: add_opt(a.a, b.a),
        b: add_opt(a.b, b.b),
        c: add_opt(a.c, b.c),
    }
}

fn sub_partial(a: &PartialPosition, b: &PartialPosition) -> PartialPosition {
    PartialPosition {
        x: sub_opt(a.x, b.x),
        y: sub_opt(a.y, b.y),
        z: sub_opt(a.z, b.z),
        a: sub_opt(a.a, b.a),
        b: sub_opt(a.b, b.b),
        c: sub_opt(a.c, b.c),
    }
}

fn add_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a.unwrap_or(0.0) + b.unwrap_or(0.0))
}

fn sub_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a.unwrap_or(0.0) - b.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_line_parses_to_ok_event() {
        let mut parser = GrblParser::new();
        assert_eq!(parser.parse_line("ok"), ParserEvent::Ok);
    }

    #[test]
    fn error_line_decodes_description() {
        let mut parser = GrblParser::new();
        match parser.parse_line("error:20") {
            ParserEvent::Error { code, description } => {
                assert_eq!(code, 20);
                assert!(description.contains("Unsupported or invalid"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn alarm_line_decodes_description() {
        let mut parser = GrblParser::new();
        match parser.parse_line("ALARM:1") {
            ParserEvent::Alarm { code, description } => {
                assert_eq!(code, 1);
                assert!(description.contains("Hard limit"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn status_line_updates_last_status() {
        let mut parser = GrblParser::new();
        parser.parse_line("<Idle|MPos:1.0,2.0,3.0|FS:0,0>");
        assert!(parser.last_status().is_some());
    }

    #[test]
    fn wpos_derives_from_mpos_and_last_wco() {
        let mut parser = GrblParser::new();
        parser.parse_line("<Idle|WPos:0,0,0|WCO:1,1,1>");
        let event = parser.parse_line("<Idle|MPos:5,5,5>");
        if let ParserEvent::Status { wpos, .. } = event {
            let wpos = wpos.unwrap();
            assert_eq!(wpos.x, Some(4.0));
        } else {
            panic!("expected status event");
        }
    }

    #[test]
    fn welcome_line_parses_version() {
        let mut parser = GrblParser::new();
        match parser.parse_line("Grbl 1.1h ['$' for help]") {
            ParserEvent::Welcome { name, version } => {
                assert_eq!(name, "Grbl");
                assert!(version.starts_with("1.1h"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn setting_line_is_tracked() {
        let mut parser = GrblParser::new();
        parser.parse_line("$110=500.000");
        assert_eq!(
            parser.last_settings().get("$110").map(String::as_str),
            Some("500.000")
        );
    }
}
