//! Per-port runtime: Feeder, Sender, Controller composition root, and the
//! Machine Status Manager aggregator sitting above them.

pub mod controller;
pub mod feeder;
pub mod sender;
pub mod status_manager;
pub mod template;

pub use controller::{Command, Controller, ControllerHandle, Outbound};
pub use feeder::{Feeder, FeederLine};
pub use sender::{DwellKind, Sender};
pub use status_manager::{AggregatedStatus, FeederCounters, SenderCounters, StatusManager};
