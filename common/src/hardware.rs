use std::collections::HashMap;

use crate::module::ModuleId;

/// Raw sensor drivers report this when they have no reading.
pub const NO_READING: f32 = 65535.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    InputPullup,
    Output,
}

/// Raw pin and sensor access.
pub trait Hardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_read(&self, pin: u8) -> bool;
    fn digital_write(&mut self, pin: u8, high: bool);
    fn read_temperature(&mut self, channel: u8) -> f32;
    fn read_humidity(&mut self, channel: u8) -> f32;
}

pub fn is_valid_reading(value: f32) -> bool {
    value.is_finite() && value != NO_READING
}

/// A relay output whose "on" level depends on how it is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relay {
    pub pin: u8,
    pub active_low: bool,
}

impl Relay {
    pub fn active_low(pin: u8) -> Self {
        Self {
            pin,
            active_low: true,
        }
    }

    pub fn active_high(pin: u8) -> Self {
        Self {
            pin,
            active_low: false,
        }
    }

    pub fn setup(&self, hw: &mut dyn Hardware) {
        hw.pin_mode(self.pin, PinMode::Output);
    }

    pub fn set(&self, hw: &mut dyn Hardware, on: bool) {
        hw.digital_write(self.pin, on != self.active_low);
    }

    pub fn is_on(&self, hw: &dyn Hardware) -> bool {
        hw.digital_read(self.pin) != self.active_low
    }
}

/// A digital input, optionally wired against a pull-up so that "closed" reads low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalInput {
    pub pin: u8,
    pub pullup: bool,
}

impl DigitalInput {
    pub fn setup(&self, hw: &mut dyn Hardware) {
        let mode = if self.pullup {
            PinMode::InputPullup
        } else {
            PinMode::Input
        };
        hw.pin_mode(self.pin, mode);
    }

    pub fn is_active(&self, hw: &dyn Hardware) -> bool {
        hw.digital_read(self.pin) != self.pullup
    }
}

/// Last known values published by a sensor module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    /// False while the sensor is failing and the values above are frozen.
    pub fresh: bool,
}

impl SensorReading {
    pub fn none() -> Self {
        Self {
            temperature: None,
            humidity: None,
            fresh: false,
        }
    }
}

/// Sensor readings gathered during one tick, keyed by the sensor's module id.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    by_module: HashMap<ModuleId, SensorReading>,
}

impl Readings {
    pub fn insert(&mut self, id: ModuleId, reading: SensorReading) {
        self.by_module.insert(id, reading);
    }

    pub fn get(&self, id: ModuleId) -> Option<&SensorReading> {
        self.by_module.get(&id)
    }

    /// Temperature usable for control: present and not frozen.
    pub fn fresh_temperature(&self, id: ModuleId) -> Option<f32> {
        self.get(id)
            .filter(|reading| reading.fresh)
            .and_then(|reading| reading.temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHardware;

    #[test]
    fn active_low_relay_inverts_level() {
        let mut hw = MockHardware::default();
        let relay = Relay::active_low(7);

        relay.set(&mut hw, true);
        assert!(!hw.level(7));
        assert!(relay.is_on(&hw));

        relay.set(&mut hw, false);
        assert!(hw.level(7));
        assert!(!relay.is_on(&hw));
    }

    #[test]
    fn sentinel_and_nan_are_not_readings() {
        assert!(is_valid_reading(21.5));
        assert!(!is_valid_reading(NO_READING));
        assert!(!is_valid_reading(f32::NAN));
    }

    #[test]
    fn frozen_reading_is_not_fresh() {
        let mut readings = Readings::default();
        let id = ModuleId(1);
        readings.insert(
            id,
            SensorReading {
                temperature: Some(20.0),
                humidity: None,
                fresh: false,
            },
        );

        assert_eq!(readings.fresh_temperature(id), None);
        assert_eq!(readings.get(id).and_then(|r| r.temperature), Some(20.0));
    }
}
