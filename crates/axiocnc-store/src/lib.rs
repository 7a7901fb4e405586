//! # AxioCNC Store
//!
//! JSON-backed collections for the gateway's persisted records: macros, MDI
//! entries, tools, watch folders, users, and machine connection profiles.

pub mod manager;
pub mod records;

pub use manager::{RecordStore, StoreError};
pub use records::{
    ControllerFamily, Macro, Machine, MdiEntry, Record, Role, Tool, User, WatchFolder,
};
