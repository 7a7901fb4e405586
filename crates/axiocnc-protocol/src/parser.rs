//! Shared parser event union. Every per-firmware parser is a pure function
//! from a received line to one of these; only the parsing rules differ.

use axiocnc_core::data::PartialPosition;

/// Common contract for turning one received line into a [`ParserEvent`],
/// implemented once per firmware family. The Controller holds this behind a
/// trait object so a port's family is a runtime choice, not a type parameter.
pub trait FirmwareParser {
    /// Parse one already-comment-and-terminator-stripped line.
    fn parse_line(&mut self, line: &str) -> ParserEvent;

    /// The last status report seen, for on-demand snapshotting between
    /// reports (e.g. right after a command that doesn't itself change
    /// position).
    fn last_status(&self) -> Option<&ParserEvent>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    Ok,
    Error {
        code: u32,
        description: String,
    },
    Alarm {
        code: u32,
        description: String,
    },
    Status {
        state: String,
        mpos: Option<PartialPosition>,
        wpos: Option<PartialPosition>,
        feedrate: Option<f64>,
        spindle_speed: Option<f64>,
        buffer: Option<(u8, u8)>,
        pins: Option<String>,
        overrides: Option<(u16, u8, u16)>,
        wcs: Option<String>,
    },
    Setting {
        key: String,
        value: String,
    },
    ParserState {
        modal: String,
    },
    Startup {
        line: String,
    },
    Welcome {
        name: String,
        version: String,
    },
    Message {
        text: String,
    },
    Feedback {
        text: String,
    },
    Other {
        raw: String,
    },
    /// TinyG/g2core's self-reported send queue depth, consumed by
    /// [`crate::flow::QueueReportFlow`] and otherwise ignored.
    QueueDepth {
        qr: u32,
    },
}
