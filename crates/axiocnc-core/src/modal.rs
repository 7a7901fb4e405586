//! G-code interpreter modal state: the sticky settings that persist across
//! lines until explicitly changed. Populated from parser `ParserState` events.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionMode {
    Rapid,
    Linear,
    ClockwiseArc,
    CounterClockwiseArc,
    CubicSpline,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
    G59_1,
    G59_2,
    G59_3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    Xy,
    Zx,
    Yz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMode {
    Absolute,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedMode {
    UnitsPerMinute,
    InverseTime,
    UnitsPerRevolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    Millimeters,
    Inches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolLengthOffsetMode {
    Cancel,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleState {
    Clockwise,
    CounterClockwise,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolantState {
    Mist,
    Flood,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramMode {
    Running,
    OptionalStop,
    CompulsoryStop,
    EndOfProgram,
}

/// Full modal state as tracked per Controller, updated by parser events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalState {
    pub motion: MotionMode,
    pub coordinate_system: CoordinateSystem,
    pub plane: Plane,
    pub distance_mode: DistanceMode,
    pub feed_mode: FeedMode,
    pub units: Units,
    pub tool_length_offset: ToolLengthOffsetMode,
    pub spindle: SpindleState,
    pub coolant: CoolantState,
    pub program_mode: ProgramMode,
    pub tool_number: u32,
    pub feedrate: f64,
    pub spindle_speed: f64,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            motion: MotionMode::None,
            coordinate_system: CoordinateSystem::G54,
            plane: Plane::Xy,
            distance_mode: DistanceMode::Absolute,
            feed_mode: FeedMode::UnitsPerMinute,
            units: Units::Millimeters,
            tool_length_offset: ToolLengthOffsetMode::Cancel,
            spindle: SpindleState::Stopped,
            coolant: CoolantState::Off,
            program_mode: ProgramMode::Running,
            tool_number: 0,
            feedrate: 0.0,
            spindle_speed: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_modal_state_matches_grbl_power_on_defaults() {
        let modal = ModalState::default();
        assert_eq!(modal.coordinate_system, CoordinateSystem::G54);
        assert_eq!(modal.units, Units::Millimeters);
        assert_eq!(modal.distance_mode, DistanceMode::Absolute);
        assert_eq!(modal.spindle, SpindleState::Stopped);
    }
}
