//! Controller identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a Controller by serial-port path plus baud rate. At most one
/// Controller exists per `ControllerId` at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId {
    pub port: String,
    pub baud_rate: u32,
}

impl ControllerId {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.port, self.baud_rate)
    }
}

/// The firmware family a port speaks, distinct from the `(port, baud_rate)`
/// identity above: two machines can share a family, and the same physical
/// port can be reconfigured to a different one across opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerFamily {
    Grbl,
    Marlin,
    Smoothieware,
    TinyG,
    G2core,
}

impl ControllerFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grbl => "grbl",
            Self::Marlin => "marlin",
            Self::Smoothieware => "smoothieware",
            Self::TinyG => "tinyg",
            Self::G2core => "g2core",
        }
    }
}

impl Default for ControllerFamily {
    fn default() -> Self {
        Self::Grbl
    }
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_port_and_baud_are_equal() {
        let a = ControllerId::new("/dev/ttyUSB0", 115200);
        let b = ControllerId::new("/dev/ttyUSB0", 115200);
        assert_eq!(a, b);
    }

    #[test]
    fn different_baud_is_a_different_identity() {
        let a = ControllerId::new("/dev/ttyUSB0", 115200);
        let b = ControllerId::new("/dev/ttyUSB0", 9600);
        assert_ne!(a, b);
    }
}
