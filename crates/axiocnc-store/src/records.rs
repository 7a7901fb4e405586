//! Record types persisted by [`crate::manager::RecordStore`]. Each type is
//! one top-level collection in the Configuration Store's JSON document.

pub use axiocnc_core::ids::ControllerFamily;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub trait Record: Clone + Serialize + for<'de> Deserialize<'de> {
    fn id(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macro {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub context_defaults: serde_json::Map<String, serde_json::Value>,
}

impl Record for Macro {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdiEntry {
    pub id: Uuid,
    pub label: String,
    pub gcode: String,
}

impl Record for MdiEntry {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub number: u32,
    pub name: String,
    pub description: String,
}

impl Record for Tool {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchFolder {
    pub id: Uuid,
    pub path: PathBuf,
    pub port: Option<String>,
    pub auto_load: bool,
}

impl Record for WatchFolder {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

impl Record for User {
    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// A persisted connection profile, distinct from the live `Controller`
/// runtime object axiocnc-runtime owns while a port is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub port: String,
    pub baud_rate: u32,
    pub controller_type: ControllerFamily,
    pub label: String,
}

impl Record for Machine {
    fn id(&self) -> String {
        self.port.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_is_keyed_by_port_not_a_uuid() {
        let machine = Machine {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            controller_type: ControllerFamily::Grbl,
            label: "shop router".to_string(),
        };
        assert_eq!(machine.id(), "/dev/ttyUSB0");
    }

    #[test]
    fn role_serializes_in_snake_case() {
        let json = serde_json::to_string(&Role::Operator).unwrap();
        assert_eq!(json, "\"operator\"");
    }
}
