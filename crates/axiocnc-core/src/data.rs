//! Position and machine-status data model.

use serde::{Deserialize, Serialize};

/// Machine or work position as a 6-tuple (X, Y, Z, A, B, C).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CNCPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl CNCPoint {
    pub fn new(x: f64, y: f64, z: f64, a: f64, b: f64, c: f64) -> Self {
        Self { x, y, z, a, b, c }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self::new(x, y, z, 0.0, 0.0, 0.0)
    }

    pub fn distance_to(&self, other: &CNCPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// MPos = WPos + offset (applied per-axis, used when only one of
    /// machine/work position was reported and the other must be derived).
    pub fn plus_offset(&self, offset: &CNCPoint) -> CNCPoint {
        CNCPoint::new(
            self.x + offset.x,
            self.y + offset.y,
            self.z + offset.z,
            self.a + offset.a,
            self.b + offset.b,
            self.c + offset.c,
        )
    }

    pub fn minus_offset(&self, offset: &CNCPoint) -> CNCPoint {
        CNCPoint::new(
            self.x - offset.x,
            self.y - offset.y,
            self.z - offset.z,
            self.a - offset.a,
            self.b - offset.b,
            self.c - offset.c,
        )
    }
}

impl Default for CNCPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for CNCPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} A:{:.3} B:{:.3} C:{:.3}",
            self.x, self.y, self.z, self.a, self.b, self.c
        )
    }
}

/// A position report in which some axes may be absent (a controller may
/// report only the axes it has configured).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialPosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
}

impl PartialPosition {
    /// Merge reported axes onto a prior full position, leaving unreported
    /// axes unchanged.
    pub fn merge_onto(&self, prior: &CNCPoint) -> CNCPoint {
        CNCPoint::new(
            self.x.unwrap_or(prior.x),
            self.y.unwrap_or(prior.y),
            self.z.unwrap_or(prior.z),
            self.a.unwrap_or(prior.a),
            self.b.unwrap_or(prior.b),
            self.c.unwrap_or(prior.c),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none()
            && self.y.is_none()
            && self.z.is_none()
            && self.a.is_none()
            && self.b.is_none()
            && self.c.is_none()
    }
}

/// Ready/homed/alarm status. `homed` is tracked separately as a sticky bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyState {
    NotConnected,
    ConnectedPreHome,
    ConnectedPostHome,
    Alarm,
    Running,
    Hold,
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotConnected => "not_connected",
            Self::ConnectedPreHome => "connected_pre_home",
            Self::ConnectedPostHome => "connected_post_home",
            Self::Alarm => "alarm",
            Self::Running => "running",
            Self::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Low-level transport state of a Controller's serial link, independent of
/// the higher-level workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicatorState {
    Closed,
    Opening,
    Open,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Compact, aggregated per-port status view exposed by the Machine Status
/// Manager to REST/UI consumers. The sole writer is the status manager; the
/// Controller only ever contributes raw parser events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStatusSnapshot {
    pub connected: bool,
    pub controller_type: String,
    pub mpos: CNCPoint,
    pub wpos: CNCPoint,
    pub feedrate: f64,
    pub spindle_speed: f64,
    pub ready_state: ReadyState,
    pub is_homed: bool,
    pub is_job_running: bool,
    pub homing_in_progress: bool,
}

impl MachineStatusSnapshot {
    pub fn disconnected(controller_type: impl Into<String>) -> Self {
        Self {
            connected: false,
            controller_type: controller_type.into(),
            mpos: CNCPoint::default(),
            wpos: CNCPoint::default(),
            feedrate: 0.0,
            spindle_speed: 0.0,
            ready_state: ReadyState::NotConnected,
            is_homed: false,
            is_job_running: false,
            homing_in_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_points_is_euclidean() {
        let a = CNCPoint::xyz(0.0, 0.0, 0.0);
        let b = CNCPoint::xyz(3.0, 4.0, 0.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn partial_position_merges_reported_axes_only() {
        let prior = CNCPoint::xyz(1.0, 2.0, 3.0);
        let partial = PartialPosition {
            z: Some(9.0),
            ..Default::default()
        };
        let merged = partial.merge_onto(&prior);
        assert_eq!(merged.x, 1.0);
        assert_eq!(merged.y, 2.0);
        assert_eq!(merged.z, 9.0);
    }

    #[test]
    fn wpos_derives_from_mpos_and_offset() {
        let mpos = CNCPoint::xyz(10.0, 0.0, 0.0);
        let offset = CNCPoint::xyz(1.0, 1.0, 0.0);
        let wpos = mpos.minus_offset(&offset);
        assert_eq!(wpos.x, 9.0);
        let back = wpos.plus_offset(&offset);
        assert_eq!(back.x, mpos.x);
    }

    #[test]
    fn disconnected_snapshot_has_not_connected_ready_state() {
        let snap = MachineStatusSnapshot::disconnected("grbl");
        assert_eq!(snap.ready_state, ReadyState::NotConnected);
        assert!(!snap.connected);
    }
}
