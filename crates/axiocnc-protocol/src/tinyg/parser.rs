//! TinyG/g2core JSON line parser. Every line is a JSON object; which key is
//! present (`r`, `sr`, `qr`, `f`) determines what kind of reply it is.

use crate::parser::{FirmwareParser, ParserEvent};
use axiocnc_core::data::PartialPosition;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct TinyGParser {
    last_status: Option<ParserEvent>,
}

impl TinyGParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> ParserEvent {
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            return ParserEvent::Message { text: line.to_string() };
        };

        let event = if let Some(status) = value.get("f").and_then(footer_status) {
            if status == 0 {
                ParserEvent::Ok
            } else {
                ParserEvent::Error {
                    code: status,
                    description: format!("tinyg footer status {status}"),
                }
            }
        } else if is_welcome(&value) {
            ParserEvent::Welcome {
                name: "TinyG".to_string(),
                version: value
                    .pointer("/r/fv")
                    .or_else(|| value.pointer("/fv"))
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            }
        } else if let Some(sr) = value.get("sr").or_else(|| value.pointer("/r/sr")) {
            parse_status_report(sr)
        } else if let Some(qr) = value.get("qr").and_then(Value::as_u64) {
            ParserEvent::QueueDepth { qr: qr as u32 }
        } else {
            ParserEvent::Other { raw: line.to_string() }
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

impl FirmwareParser for TinyGParser {
    fn parse_line(&mut self, line: &str) -> ParserEvent {
        TinyGParser::parse_line(self, line)
    }

    fn last_status(&self) -> Option<&ParserEvent> {
        TinyGParser::last_status(self)
    }
}

fn footer_status(footer: &Value) -> Option<u32> {
    footer.as_array()?.get(1)?.as_u64().map(|v| v as u32)
}

/// g2core's response to its identity query (sent once after boot/reset)
/// carries a firmware build number nowhere else in the protocol.
fn is_welcome(value: &Value) -> bool {
    value.pointer("/r/fb").is_some() || value.get("fb").is_some()
}

fn parse_status_report(sr: &Value) -> ParserEvent {
    let stat = sr.get("stat").and_then(Value::as_u64);
    if stat == Some(2) {
        return ParserEvent::Alarm {
            code: 2,
            description: "machine alarm".to_string(),
        };
    }

    let mpos = PartialPosition {
        x: sr.get("posx").and_then(Value::as_f64),
        y: sr.get("posy").and_then(Value::as_f64),
        z: sr.get("posz").and_then(Value::as_f64),
        a: sr.get("posa").and_then(Value::as_f64),
        b: sr.get("posb").and_then(Value::as_f64),
        c: sr.get("posc").and_then(Value::as_f64),
    };

    ParserEvent::Status {
        state: state_for_stat(stat).to_string(),
        mpos: Some(mpos),
        wpos: None,
        feedrate: sr.get("vel").and_then(Value::as_f64),
        spindle_speed: None,
        buffer: None,
        pins: None,
        overrides: None,
        wcs: None,
    }
}

fn state_for_stat(stat: Option<u64>) -> &'static str {
    match stat {
        Some(5) | Some(7) | Some(8) => "Run",
        Some(6) => "Hold",
        Some(9) => "Home",
        Some(10) => "Jog",
        _ => "Idle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_footer_parses_to_ok_event() {
        let mut parser = TinyGParser::new();
        assert_eq!(
            parser.parse_line(r#"{"r":{},"f":[1,0,10,1170]}"#),
            ParserEvent::Ok
        );
    }

    #[test]
    fn nonzero_footer_status_is_an_error() {
        let mut parser = TinyGParser::new();
        match parser.parse_line(r#"{"r":{},"f":[1,50,10,1170]}"#) {
            ParserEvent::Error { code, .. } => assert_eq!(code, 50),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn status_report_maps_run_state_and_position() {
        let mut parser = TinyGParser::new();
        match parser.parse_line(r#"{"sr":{"posx":1.0,"posy":2.0,"posz":3.0,"stat":5}}"#) {
            ParserEvent::Status { state, mpos, .. } => {
                assert_eq!(state, "Run");
                assert_eq!(mpos.unwrap().x, Some(1.0));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn alarm_stat_code_yields_alarm_event() {
        let mut parser = TinyGParser::new();
        assert!(matches!(
            parser.parse_line(r#"{"sr":{"stat":2}}"#),
            ParserEvent::Alarm { .. }
        ));
    }

    #[test]
    fn bare_queue_report_is_forwarded_as_queue_depth() {
        let mut parser = TinyGParser::new();
        assert_eq!(
            parser.parse_line(r#"{"qr":28}"#),
            ParserEvent::QueueDepth { qr: 28 }
        );
    }

    #[test]
    fn firmware_build_reply_is_the_welcome_banner() {
        let mut parser = TinyGParser::new();
        assert!(matches!(
            parser.parse_line(r#"{"r":{"fb":100.26,"fv":0.99}}"#),
            ParserEvent::Welcome { .. }
        ));
    }
}
