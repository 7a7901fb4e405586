//! Real-time feed/rapid/spindle override tracking for Grbl.
//!
//! Override percentages are local bookkeeping; the actual effect on the
//! controller happens by writing the realtime byte this module picks for
//! the delta between the previous and requested percentage.

use axiocnc_core::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealTimeOverrideCommand {
    FeedHold = 0x21,
    CycleStart = 0x7E,
    Reset = 0x18,
    FeedDecrease10 = 0x91,
    FeedDecrease1 = 0x92,
    FeedIncrease1 = 0x93,
    FeedIncrease10 = 0x94,
    RapidOv25 = 0x95,
    RapidOv50 = 0x96,
    RapidOv100 = 0x97,
    SpindleDecrease10 = 0x99,
    SpindleDecrease1 = 0x9A,
    SpindleIncrease1 = 0x9B,
    SpindleIncrease10 = 0x9C,
    SpindleStop = 0x9D,
}

impl RealTimeOverrideCommand {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone)]
pub struct OverrideManager {
    feed_override: u16,
    rapid_override: u8,
    spindle_override: u16,
    previous_feed: u16,
    previous_spindle: u16,
}

impl OverrideManager {
    pub fn new() -> Self {
        Self {
            feed_override: 100,
            rapid_override: 100,
            spindle_override: 100,
            previous_feed: 100,
            previous_spindle: 100,
        }
    }

    pub fn get_feed_override(&self) -> u16 {
        self.feed_override
    }

    pub fn get_rapid_override(&self) -> u8 {
        self.rapid_override
    }

    pub fn get_spindle_override(&self) -> u16 {
        self.spindle_override
    }

    pub fn set_feed_override(&mut self, percentage: u16) -> Result<(), ValidationError> {
        if percentage > 200 {
            return Err(ValidationError::BadArgument {
                argument: "feed_override".to_string(),
                reason: format!("must be 0-200%, got {percentage}"),
            });
        }
        self.previous_feed = self.feed_override;
        self.feed_override = percentage;
        Ok(())
    }

    pub fn increase_feed_1(&mut self) -> Result<(), ValidationError> {
        self.set_feed_override(std::cmp::min(self.feed_override + 1, 200))
    }

    pub fn decrease_feed_1(&mut self) -> Result<(), ValidationError> {
        self.set_feed_override(self.feed_override.saturating_sub(1))
    }

    pub fn increase_feed_10(&mut self) -> Result<(), ValidationError> {
        self.set_feed_override(std::cmp::min(self.feed_override + 10, 200))
    }

    pub fn decrease_feed_10(&mut self) -> Result<(), ValidationError> {
        self.set_feed_override(self.feed_override.saturating_sub(10))
    }

    pub fn set_rapid_override(&mut self, percentage: u8) -> Result<(), ValidationError> {
        if ![25, 50, 100].contains(&percentage) {
            return Err(ValidationError::BadArgument {
                argument: "rapid_override".to_string(),
                reason: format!("must be 25, 50, or 100%, got {percentage}"),
            });
        }
        self.rapid_override = percentage;
        Ok(())
    }

    pub fn get_rapid_override_command(&self) -> RealTimeOverrideCommand {
        match self.rapid_override {
            25 => RealTimeOverrideCommand::RapidOv25,
            50 => RealTimeOverrideCommand::RapidOv50,
            _ => RealTimeOverrideCommand::RapidOv100,
        }
    }

    pub fn set_spindle_override(&mut self, percentage: u16) -> Result<(), ValidationError> {
        if percentage > 200 {
            return Err(ValidationError::BadArgument {
                argument: "spindle_override".to_string(),
                reason: format!("must be 0-200%, got {percentage}"),
            });
        }
        self.previous_spindle = self.spindle_override;
        self.spindle_override = percentage;
        Ok(())
    }

    pub fn increase_spindle_1(&mut self) -> Result<(), ValidationError> {
        self.set_spindle_override(std::cmp::min(self.spindle_override + 1, 200))
    }

    pub fn decrease_spindle_1(&mut self) -> Result<(), ValidationError> {
        self.set_spindle_override(self.spindle_override.saturating_sub(1))
    }

    pub fn increase_spindle_10(&mut self) -> Result<(), ValidationError> {
        self.set_spindle_override(std::cmp::min(self.spindle_override + 10, 200))
    }

    pub fn decrease_spindle_10(&mut self) -> Result<(), ValidationError> {
        self.set_spindle_override(self.spindle_override.saturating_sub(10))
    }

    pub fn stop_spindle(&mut self) -> Result<(), ValidationError> {
        self.previous_spindle = self.spindle_override;
        self.spindle_override = 0;
        Ok(())
    }

    pub fn reset_all(&mut self) {
        self.feed_override = 100;
        self.rapid_override = 100;
        self.spindle_override = 100;
    }

    pub fn is_overridden(&self) -> bool {
        self.feed_override != 100 || self.rapid_override != 100 || self.spindle_override != 100
    }

    pub fn get_feed_override_command(&self) -> Option<RealTimeOverrideCommand> {
        if self.feed_override == self.previous_feed {
            return None;
        }
        if self.feed_override > self.previous_feed {
            let diff = self.feed_override - self.previous_feed;
            Some(if diff >= 10 {
                RealTimeOverrideCommand::FeedIncrease10
            } else {
                RealTimeOverrideCommand::FeedIncrease1
            })
        } else {
            let diff = self.previous_feed - self.feed_override;
            Some(if diff >= 10 {
                RealTimeOverrideCommand::FeedDecrease10
            } else {
                RealTimeOverrideCommand::FeedDecrease1
            })
        }
    }

    pub fn get_spindle_override_command(&self) -> Option<RealTimeOverrideCommand> {
        if self.spindle_override == self.previous_spindle {
            return None;
        }
        if self.spindle_override == 0 {
            return Some(RealTimeOverrideCommand::SpindleStop);
        }
        if self.spindle_override > self.previous_spindle {
            let diff = self.spindle_override - self.previous_spindle;
            Some(if diff >= 10 {
                RealTimeOverrideCommand::SpindleIncrease10
            } else {
                RealTimeOverrideCommand::SpindleIncrease1
            })
        } else {
            let diff = self.previous_spindle - self.spindle_override;
            Some(if diff >= 10 {
                RealTimeOverrideCommand::SpindleDecrease10
            } else {
                RealTimeOverrideCommand::SpindleDecrease1
            })
        }
    }
}

impl Default for OverrideManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_override_out_of_range_is_rejected() {
        let mut mgr = OverrideManager::new();
        assert!(mgr.set_feed_override(250).is_err());
    }

    #[test]
    fn rapid_override_must_be_one_of_three_values() {
        let mut mgr = OverrideManager::new();
        assert!(mgr.set_rapid_override(75).is_err());
        assert!(mgr.set_rapid_override(50).is_ok());
        assert_eq!(mgr.get_rapid_override_command(), RealTimeOverrideCommand::RapidOv50);
    }

    #[test]
    fn feed_override_command_picks_10_percent_step() {
        let mut mgr = OverrideManager::new();
        mgr.set_feed_override(90).unwrap();
        assert_eq!(
            mgr.get_feed_override_command(),
            Some(RealTimeOverrideCommand::FeedDecrease10)
        );
    }

    #[test]
    fn zero_spindle_override_maps_to_stop_command() {
        let mut mgr = OverrideManager::new();
        mgr.stop_spindle().unwrap();
        assert_eq!(
            mgr.get_spindle_override_command(),
            Some(RealTimeOverrideCommand::SpindleStop)
        );
    }

    #[test]
    fn reset_all_returns_to_defaults() {
        let mut mgr = OverrideManager::new();
        mgr.set_feed_override(150).unwrap();
        mgr.reset_all();
        assert!(!mgr.is_overridden());
    }
}
