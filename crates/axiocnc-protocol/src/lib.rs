//! # AxioCNC Protocol
//!
//! Everything between raw transport bytes and a firmware-agnostic event: the
//! line codec, serial/TCP transport, per-firmware parsers, and the flow
//! control strategies that pace how fast lines go out.

pub mod codec;
pub mod connection_watch;
pub mod flow;
pub mod grbl;
pub mod marlin;
pub mod parser;
pub mod tinyg;
pub mod transport;

pub use codec::{DecodedLine, LineCodec};
pub use connection_watch::{ConnectionWatchConfig, ConnectionWatchState, ConnectionWatcher};
pub use flow::{CharacterCountingFlow, FlowController, LineId, LockstepFlow, QueueReportFlow};
pub use marlin::MarlinParser;
pub use parser::{FirmwareParser, ParserEvent};
pub use tinyg::TinyGParser;
pub use transport::{RealtimeByte, Transport};
