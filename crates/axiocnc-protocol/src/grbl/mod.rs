//! Grbl firmware support: constants, error/alarm decoding, realtime
//! override bookkeeping, status-line parsing and the stateful line parser.

pub mod constants;
pub mod error_decoder;
pub mod override_manager;
pub mod parser;
pub mod status_parser;

pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use override_manager::{OverrideManager, RealTimeOverrideCommand};
pub use parser::GrblParser;
pub use status_parser::{BufferRxState, StatusFields};
