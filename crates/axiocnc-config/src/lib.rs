//! # AxioCNC Config
//!
//! Persistent, debounced, dot-path JSON configuration store shared by the
//! gateway's REST surface and every Controller.

pub mod store;

pub use store::{default_config_path, ConfigChange, ConfigError, ConfigStore, ConfigSubscription};
