//! Temperature and humidity sensor module.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::{RecordReader, RecordWriter, StoredConfig},
    error::HiveError,
    hardware::{is_valid_reading, Hardware, Readings, SensorReading, NO_READING},
    module::{Module, ModuleId, ModuleIo},
    settings::{SettingsRecord, FIELD_MODULE_STATE, FIELD_MODULE_TYPE, FIELD_ZONE_ID},
    supervisor::Supervisor,
    threshold::Bounds,
};

pub const MODULE_TYPE: &str = "ClimateSensor";

const FIELD_MEASURE_UNITS: &str = "measureUnits";
const FIELD_MEASURE_INTERVAL: &str = "measureInterval";
const FIELD_TEMPERATURE: &str = "temperature";
const FIELD_HUMIDITY: &str = "humidity";
const FIELD_AVAILABLE: &str = "available";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_MODULE_TYPE,
    FIELD_ZONE_ID,
    FIELD_MODULE_STATE,
    FIELD_MEASURE_UNITS,
    FIELD_MEASURE_INTERVAL,
    FIELD_TEMPERATURE,
    FIELD_HUMIDITY,
    FIELD_AVAILABLE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Combined temperature and humidity sensor.
    Dht,
    /// Temperature-only one-wire probe.
    OneWire,
}

impl SensorKind {
    pub fn temperature_bounds(self) -> Bounds {
        match self {
            Self::Dht => Bounds {
                lower: -40.0,
                upper: 80.0,
            },
            Self::OneWire => Bounds {
                lower: -55.0,
                upper: 125.0,
            },
        }
    }

    pub fn humidity_bounds(self) -> Bounds {
        Bounds {
            lower: 0.0,
            upper: 100.0,
        }
    }

    pub fn has_humidity(self) -> bool {
        self == Self::Dht
    }

    /// Shortest interval the sensor can be sampled at, in seconds.
    pub fn min_interval_s(self) -> u8 {
        match self {
            Self::Dht => 2,
            Self::OneWire => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureUnits {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateSensorConfig {
    pub measure_units: u8,
    pub module_state: u8,
    pub measure_interval_s: u8,
}

impl Default for ClimateSensorConfig {
    fn default() -> Self {
        Self {
            measure_units: 0,
            module_state: 1,
            measure_interval_s: 30,
        }
    }
}

impl ClimateSensorConfig {
    pub fn units(&self) -> MeasureUnits {
        if self.measure_units == 1 {
            MeasureUnits::Fahrenheit
        } else {
            MeasureUnits::Celsius
        }
    }

    fn validate(&self, kind: SensorKind) -> Result<(), HiveError> {
        if self.measure_units > 1 {
            return Err(HiveError::invalid(format!(
                "measureUnits {} is not 0 or 1",
                self.measure_units
            )));
        }
        if self.module_state > 1 {
            return Err(HiveError::invalid(format!(
                "moduleState {} is not 0 or 1",
                self.module_state
            )));
        }
        if self.measure_interval_s < kind.min_interval_s() {
            return Err(HiveError::invalid(format!(
                "measureInterval {} is below {}",
                self.measure_interval_s,
                kind.min_interval_s()
            )));
        }
        Ok(())
    }
}

impl StoredConfig for ClimateSensorConfig {
    const STORAGE_SIZE: usize = 3;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        writer.put_u8(self.measure_units)?;
        writer.put_u8(self.module_state)?;
        writer.put_u8(self.measure_interval_s)
    }

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        Ok(Self {
            measure_units: reader.get_u8()?,
            module_state: reader.get_u8()?,
            measure_interval_s: reader.get_u8()?,
        })
    }
}

pub struct ClimateSensor {
    supervisor: Supervisor,
    config: ClimateSensorConfig,
    kind: SensorKind,
    channel: u8,
    reading: SensorReading,
    last_sample_ms: Option<u64>,
}

impl ClimateSensor {
    pub fn new(id: ModuleId, zone: u8, offset: usize, kind: SensorKind, channel: u8) -> Self {
        Self {
            supervisor: Supervisor::new(id, zone, offset),
            config: ClimateSensorConfig::default(),
            kind,
            channel,
            reading: SensorReading::none(),
            last_sample_ms: None,
        }
    }

    pub fn config(&self) -> &ClimateSensorConfig {
        &self.config
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    fn sample(&mut self, io: &mut ModuleIo<'_>) {
        let temperature = io.hardware.read_temperature(self.channel);
        let humidity = if self.kind.has_humidity() {
            Some(io.hardware.read_humidity(self.channel))
        } else {
            None
        };

        if !is_valid_reading(temperature) || humidity.is_some_and(|h| !is_valid_reading(h)) {
            if self.reading.fresh {
                warn!(module = %self.supervisor.id(), channel = self.channel, "sensor reading unavailable, holding last value");
                self.reading.fresh = false;
                self.supervisor.notify(io.notifier);
            }
            return;
        }

        let next = SensorReading {
            temperature: Some(temperature),
            humidity,
            fresh: true,
        };
        if next != self.reading {
            debug!(module = %self.supervisor.id(), temperature, ?humidity, "sensor reading changed");
            self.reading = next;
            self.supervisor.notify(io.notifier);
        }
    }

    fn display_temperature(&self) -> f32 {
        match (self.reading.temperature, self.config.units()) {
            (Some(celsius), MeasureUnits::Fahrenheit) => celsius * 9.0 / 5.0 + 32.0,
            (Some(celsius), MeasureUnits::Celsius) => celsius,
            (None, _) => NO_READING,
        }
    }
}

impl Module for ClimateSensor {
    fn id(&self) -> ModuleId {
        self.supervisor.id()
    }

    fn module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn storage_size(&self) -> usize {
        ClimateSensorConfig::STORAGE_SIZE
    }

    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError> {
        let kind = self.kind;
        self.supervisor
            .init(io.storage, &mut self.config, load, |config| config.validate(kind))
    }

    fn tick(&mut self, io: &mut ModuleIo<'_>, _readings: &Readings) {
        self.supervisor.retry_unsaved(io.storage, &self.config);
        if !self.is_enabled() {
            return;
        }
        let interval_ms = u64::from(self.config.measure_interval_s) * 1000;
        let due = self
            .last_sample_ms
            .map_or(true, |last| io.now_ms.saturating_sub(last) >= interval_ms);
        if due {
            self.last_sample_ms = Some(io.now_ms);
            self.sample(io);
        }
    }

    fn expose_settings(&mut self, record: &mut SettingsRecord, _hardware: &dyn Hardware) -> bool {
        if !self.supervisor.begin_exposure(record, MODULE_TYPE) {
            return false;
        }
        record.put(FIELD_MODULE_STATE, self.is_enabled());
        record.put(FIELD_MEASURE_UNITS, self.config.measure_units);
        record.put(FIELD_MEASURE_INTERVAL, self.config.measure_interval_s);
        record.put(FIELD_TEMPERATURE, self.display_temperature());
        record.put(
            FIELD_HUMIDITY,
            self.reading.humidity.unwrap_or(NO_READING),
        );
        record.put(FIELD_AVAILABLE, self.reading.fresh);
        true
    }

    fn apply_settings(
        &mut self,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        request.require_module_type(MODULE_TYPE)?;
        request.ensure_known(KNOWN_FIELDS)?;
        let enabled = request.require_flag(FIELD_MODULE_STATE)?;
        let candidate = ClimateSensorConfig {
            measure_units: request.require_int_in(FIELD_MEASURE_UNITS, 0..=1)? as u8,
            module_state: self.config.module_state,
            measure_interval_s: request
                .require_int_in(FIELD_MEASURE_INTERVAL, i64::from(self.kind.min_interval_s())..=255)?
                as u8,
        };
        candidate.validate(self.kind)?;

        if enabled != self.is_enabled() {
            self.set_enabled(enabled, io)?;
        }
        if candidate != self.config {
            self.config = candidate;
            self.last_sample_ms = None;
            self.supervisor.persist(io.storage, &self.config)?;
        }
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError> {
        if enabled == self.is_enabled() {
            return Ok(());
        }
        self.config.module_state = u8::from(enabled);
        self.last_sample_ms = None;
        if enabled {
            self.sample(io);
            self.last_sample_ms = Some(io.now_ms);
        } else {
            self.reading = SensorReading::none();
        }
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn is_enabled(&self) -> bool {
        self.config.module_state == 1
    }

    fn reading(&self) -> Option<SensorReading> {
        Some(self.reading)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::Bench;

    const OFFSET: usize = 4;

    fn sensor() -> ClimateSensor {
        ClimateSensor::new(ModuleId(1), 0, OFFSET, SensorKind::Dht, 0)
    }

    fn started(bench: &mut Bench) -> ClimateSensor {
        let mut sensor = sensor();
        sensor.init(&mut bench.io(0), false).unwrap();
        sensor
    }

    fn request(units: i64, interval: i64) -> SettingsRecord {
        SettingsRecord::new()
            .with(FIELD_MODULE_TYPE, MODULE_TYPE)
            .with(FIELD_MODULE_STATE, true)
            .with(FIELD_MEASURE_UNITS, units)
            .with(FIELD_MEASURE_INTERVAL, interval)
    }

    #[test]
    fn samples_on_interval_and_notifies_changes() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        bench.hardware.set_temperature(0, 21.0);
        bench.hardware.set_humidity(0, 40.0);

        sensor.tick(&mut bench.io(0), &Readings::default());
        assert_eq!(sensor.reading().and_then(|r| r.temperature), Some(21.0));
        assert_eq!(bench.notifier.drain(), vec![ModuleId(1)]);

        bench.hardware.set_temperature(0, 22.0);
        sensor.tick(&mut bench.io(29_999), &Readings::default());
        assert_eq!(sensor.reading().and_then(|r| r.temperature), Some(21.0));

        sensor.tick(&mut bench.io(30_000), &Readings::default());
        assert_eq!(sensor.reading().and_then(|r| r.temperature), Some(22.0));
        assert_eq!(bench.notifier.drain(), vec![ModuleId(1)]);

        sensor.tick(&mut bench.io(60_000), &Readings::default());
        assert!(bench.notifier.is_empty());
    }

    #[test]
    fn failed_reading_freezes_last_value() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        bench.hardware.set_temperature(0, 21.0);
        bench.hardware.set_humidity(0, 40.0);
        sensor.tick(&mut bench.io(0), &Readings::default());

        bench.hardware.set_temperature(0, f32::NAN);
        sensor.tick(&mut bench.io(30_000), &Readings::default());
        let reading = sensor.reading().unwrap();
        assert_eq!(reading.temperature, Some(21.0));
        assert!(!reading.fresh);

        bench.hardware.set_temperature(0, 23.5);
        sensor.tick(&mut bench.io(60_000), &Readings::default());
        let reading = sensor.reading().unwrap();
        assert_eq!(reading.temperature, Some(23.5));
        assert!(reading.fresh);
    }

    #[test]
    fn disabling_clears_readings() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        bench.hardware.set_temperature(0, 21.0);
        bench.hardware.set_humidity(0, 40.0);
        sensor.tick(&mut bench.io(0), &Readings::default());

        sensor.set_enabled(false, &mut bench.io(10)).unwrap();
        assert_eq!(sensor.reading(), Some(SensorReading::none()));

        sensor.tick(&mut bench.io(60_000), &Readings::default());
        assert_eq!(sensor.reading(), Some(SensorReading::none()));
    }

    #[test]
    fn invalid_request_changes_nothing() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        let before = bench.storage.bytes().to_vec();

        let result = sensor.apply_settings(&request(1, 1), &mut bench.io(0));

        assert!(result.unwrap_err().is_invalid_settings());
        assert_eq!(sensor.config(), &ClimateSensorConfig::default());
        assert_eq!(bench.storage.bytes(), before.as_slice());
    }

    #[test]
    fn saved_settings_load_back() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        sensor
            .apply_settings(&request(1, 10), &mut bench.io(0))
            .unwrap();

        let mut reloaded = self::sensor();
        reloaded.init(&mut bench.io(0), true).unwrap();
        assert_eq!(reloaded.config(), sensor.config());
        assert_eq!(reloaded.config().units(), MeasureUnits::Fahrenheit);
    }

    #[test]
    fn exposes_fahrenheit_when_configured() {
        let mut bench = Bench::default();
        let mut sensor = started(&mut bench);
        sensor
            .apply_settings(&request(1, 10), &mut bench.io(0))
            .unwrap();
        bench.hardware.set_temperature(0, 20.0);
        bench.hardware.set_humidity(0, 50.0);
        sensor.tick(&mut bench.io(0), &Readings::default());

        let mut record = SettingsRecord::new();
        assert!(sensor.expose_settings(&mut record, &bench.hardware));
        assert_eq!(record.require_float(FIELD_TEMPERATURE), Ok(68.0));
        assert_eq!(record.require_bool(FIELD_AVAILABLE), Ok(true));
        assert!(!sensor.expose_settings(&mut record, &bench.hardware));
    }
}
