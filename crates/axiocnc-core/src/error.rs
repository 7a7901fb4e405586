//! Error taxonomy for AxioCNC.
//!
//! Each variant here corresponds to one of the error kinds named in the
//! gateway's error handling design: port I/O, wire-protocol desync, a parsed
//! controller error/alarm reply, a feeder macro failure, a bad client
//! command, or an auth failure. Recoverable, line-scoped errors are carried
//! as values on events rather than propagated as exceptions; this type is
//! for the cases that do need to propagate.

use thiserror::Error;

/// Cannot open, lost, or failed serial/TCP link to a controller.
#[derive(Error, Debug, Clone)]
pub enum PortError {
    #[error("port not found: {port}")]
    NotFound { port: String },

    #[error("port already in use: {port}")]
    InUse { port: String },

    #[error("failed to open {port}: {reason}")]
    FailedToOpen { port: String, reason: String },

    #[error("connection lost on {port}: {reason}")]
    ConnectionLost { port: String, reason: String },

    #[error("baud rate {baud} not supported")]
    UnsupportedBaudRate { baud: u32 },

    #[error("I/O error on {port}: {reason}")]
    Io { port: String, reason: String },
}

/// Wire-protocol level failure: over-length line, unrecognized reply, or a
/// reply that doesn't correspond to anything in the flow-control ledger.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("line exceeded {max_len} bytes without a terminator on {port}")]
    OverLengthLine { port: String, max_len: usize },

    #[error("unrecognized reply from {port}: {raw}")]
    UnrecognizedReply { port: String, raw: String },

    #[error("reply received with empty ledger on {port}: {raw}")]
    Desync { port: String, raw: String },
}

/// A parsed `error:<code>` reply from the controller, local to one line.
#[derive(Error, Debug, Clone)]
#[error("controller error {code} on line {line_id}: {description}")]
pub struct ControllerError {
    pub code: u32,
    pub description: String,
    pub line_id: u64,
}

/// A parsed `ALARM:<code>` reply. Halts new motion writes until unlock/reset.
#[derive(Error, Debug, Clone)]
#[error("alarm {code}: {description}")]
pub struct ControllerAlarm {
    pub code: u32,
    pub description: String,
}

/// Macro template evaluation failed for one feeder line; that line is
/// discarded and subsequent lines continue.
#[derive(Error, Debug, Clone)]
#[error("feeder template error on line {line_id:?}: {reason}")]
pub struct FeederError {
    pub line_id: Option<u64>,
    pub reason: String,
}

/// A client command was malformed or addressed an unknown port. No side
/// effects occur; returned synchronously to the session.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("unknown port: {port}")]
    UnknownPort { port: String },

    #[error("bad argument '{argument}': {reason}")]
    BadArgument { argument: String, reason: String },

    #[error("command not valid in current workflow state: {command}")]
    InvalidWorkflowCommand { command: String },
}

/// Bearer token invalid or expired. The session is terminated.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,
}

/// Unified error type for AxioCNC's public APIs.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Alarm(#[from] ControllerAlarm),

    #[error(transparent)]
    Feeder(#[from] FeederError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn is_port_error(&self) -> bool {
        matches!(self, Error::Port(_))
    }

    pub fn is_alarm(&self) -> bool {
        matches!(self, Error::Alarm(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_error_converts_into_unified_error() {
        let err: Error = ControllerError {
            code: 20,
            description: "Unsupported or invalid g-code command".to_string(),
            line_id: 7,
        }
        .into();
        assert!(matches!(err, Error::Controller(_)));
        assert!(err.to_string().contains("error 20"));
    }

    #[test]
    fn alarm_is_detected_via_helper() {
        let err: Error = ControllerAlarm {
            code: 1,
            description: "Hard limit triggered".to_string(),
        }
        .into();
        assert!(err.is_alarm());
        assert!(!err.is_port_error());
    }

    #[test]
    fn auth_error_variants_are_distinct() {
        let missing: Error = AuthError::MissingToken.into();
        let invalid: Error = AuthError::InvalidToken.into();
        assert!(missing.is_auth_error());
        assert_ne!(missing.to_string(), invalid.to_string());
    }
}
