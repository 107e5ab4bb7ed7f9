use std::collections::HashMap;

use hive_common::{modules::SensorKind, Hardware, ModuleSpec, PinMode, NO_READING};

/// Heated zone temperature relaxes towards ambient plus this much with the
/// heater relay on.
const HEATER_GAIN_C: f32 = 12.0;
const ZONE_TIME_CONSTANT_MS: f32 = 900_000.0;

#[derive(Debug, Clone)]
struct Zone {
    ambient: f32,
    temperature: f32,
    humidity: Option<f32>,
    heater_pin: Option<u8>,
}

/// Pins and sensors of a node without real hardware. Relay outputs are
/// remembered, inputs can be driven from outside, and each climate channel
/// follows a first-order thermal model.
#[derive(Debug, Default)]
pub struct SimHardware {
    levels: HashMap<u8, bool>,
    zones: HashMap<u8, Zone>,
    last_advance_ms: Option<u64>,
}

impl SimHardware {
    pub fn from_layout(specs: &[ModuleSpec]) -> Self {
        let mut sim = Self::default();
        for spec in specs {
            if let ModuleSpec::ClimateSensor {
                sensor, channel, ..
            } = spec
            {
                let (ambient, humidity) = match sensor {
                    SensorKind::Dht => (21.0, Some(45.0)),
                    SensorKind::OneWire => (19.0, None),
                };
                sim.zones.insert(
                    *channel,
                    Zone {
                        ambient,
                        temperature: ambient,
                        humidity,
                        heater_pin: None,
                    },
                );
            }
        }

        for spec in specs {
            if let ModuleSpec::FloorHeater {
                sensor_id,
                relay_pin,
                ..
            } = spec
            {
                let channel = specs.iter().find_map(|candidate| match candidate {
                    ModuleSpec::ClimateSensor { id, channel, .. } if id == sensor_id => {
                        Some(*channel)
                    }
                    _ => None,
                });
                if let Some(zone) = channel.and_then(|channel| sim.zones.get_mut(&channel)) {
                    zone.heater_pin = Some(*relay_pin);
                }
            }
        }
        sim
    }

    /// Drives an input pin as if a switch or detector changed.
    pub fn set_input(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
    }

    pub fn level(&self, pin: u8) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn advance(&mut self, now_ms: u64) {
        let elapsed = self
            .last_advance_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_advance_ms = Some(now_ms);
        if elapsed == 0 {
            return;
        }

        let alpha = (elapsed as f32 / ZONE_TIME_CONSTANT_MS).min(1.0);
        for zone in self.zones.values_mut() {
            let heating = zone
                .heater_pin
                .is_some_and(|pin| self.levels.get(&pin).copied().unwrap_or(false));
            let target = zone.ambient + if heating { HEATER_GAIN_C } else { 0.0 };
            zone.temperature += (target - zone.temperature) * alpha;
        }
    }

    pub fn temperature(&self, channel: u8) -> Option<f32> {
        self.zones.get(&channel).map(|zone| zone.temperature)
    }
}

impl Hardware for SimHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        if mode == PinMode::InputPullup {
            self.levels.entry(pin).or_insert(true);
        }
    }

    fn digital_read(&self, pin: u8) -> bool {
        self.level(pin)
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
    }

    fn read_temperature(&mut self, channel: u8) -> f32 {
        self.temperature(channel).unwrap_or(NO_READING)
    }

    fn read_humidity(&mut self, channel: u8) -> f32 {
        self.zones
            .get(&channel)
            .and_then(|zone| zone.humidity)
            .unwrap_or(NO_READING)
    }
}
