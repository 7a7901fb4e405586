//! GRBL protocol constants.

/// Default RX buffer capacity used for character-counting flow control.
pub const GRBL_DEFAULT_BUFFER_SIZE: usize = 128;

/// Default serial baud rate.
pub const GRBL_DEFAULT_BAUD_RATE: u32 = 115200;

pub const CMD_QUERY_STATUS: u8 = b'?';
pub const CMD_FEED_HOLD: u8 = b'!';
pub const CMD_CYCLE_START: u8 = b'~';
pub const CMD_SOFT_RESET: u8 = 0x18;

pub const STATUS_IDLE: &str = "Idle";
pub const STATUS_RUN: &str = "Run";
pub const STATUS_HOLD: &str = "Hold";
pub const STATUS_JOG: &str = "Jog";
pub const STATUS_ALARM: &str = "Alarm";
pub const STATUS_CHECK: &str = "Check";
pub const STATUS_DOOR: &str = "Door";
pub const STATUS_SLEEP: &str = "Sleep";

pub const COORD_SYS_G54: &str = "G54";
pub const COORD_SYS_G55: &str = "G55";
pub const COORD_SYS_G56: &str = "G56";
pub const COORD_SYS_G57: &str = "G57";
pub const COORD_SYS_G58: &str = "G58";
pub const COORD_SYS_G59: &str = "G59";
pub const COORD_SYS_G59_1: &str = "G59.1";
pub const COORD_SYS_G59_2: &str = "G59.2";
pub const COORD_SYS_G59_3: &str = "G59.3";
