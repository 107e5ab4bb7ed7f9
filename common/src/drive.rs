use serde::{Deserialize, Serialize};

use crate::error::HiveError;

/// Who decides an actuator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Sensor, switch or schedule driven.
    #[default]
    Auto,
    ManualOn,
    ManualOff,
}

impl DriveMode {
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::ManualOn => 1,
            Self::ManualOff => 2,
        }
    }

    pub fn is_manual(self) -> bool {
        self != Self::Auto
    }

    /// Output the actuator should have, given what auto mode would decide.
    pub fn desired(self, auto_active: bool) -> bool {
        match self {
            Self::Auto => auto_active,
            Self::ManualOn => true,
            Self::ManualOff => false,
        }
    }
}

impl TryFrom<i64> for DriveMode {
    type Error = HiveError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::ManualOn),
            2 => Ok(Self::ManualOff),
            other => Err(HiveError::invalid(format!("drive mode {other} is not in 0..=2"))),
        }
    }
}

/// Counts debounced wall-switch flips made while a manual override is active.
/// Two flips ask for a return to auto mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlipCounter {
    flips: u8,
}

impl FlipCounter {
    pub const ESCAPE_FLIPS: u8 = 2;

    /// Returns true when this flip completes the escape sequence.
    pub fn register(&mut self) -> bool {
        self.flips = self.flips.saturating_add(1);
        if self.flips >= Self::ESCAPE_FLIPS {
            self.flips = 0;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.flips = 0;
    }

    pub fn flips(&self) -> u8 {
        self.flips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_reject_out_of_range() {
        for mode in [DriveMode::Auto, DriveMode::ManualOn, DriveMode::ManualOff] {
            assert_eq!(DriveMode::try_from(i64::from(mode.code())), Ok(mode));
        }
        assert!(DriveMode::try_from(5i64).unwrap_err().is_invalid_settings());
        assert!(DriveMode::try_from(-1i64).is_err());
    }

    #[test]
    fn manual_modes_ignore_auto_decision() {
        assert!(DriveMode::Auto.desired(true));
        assert!(!DriveMode::Auto.desired(false));
        assert!(DriveMode::ManualOn.desired(false));
        assert!(!DriveMode::ManualOff.desired(true));
    }

    #[test]
    fn second_flip_triggers_escape() {
        let mut counter = FlipCounter::default();
        assert!(!counter.register());
        assert!(counter.register());
        assert_eq!(counter.flips(), 0);
    }
}
