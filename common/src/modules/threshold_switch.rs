//! Relay switched by temperature/humidity thresholds from a climate sensor.

use tracing::info;

use crate::{
    codec::{RecordReader, RecordWriter, StoredConfig},
    drive::DriveMode,
    error::HiveError,
    hardware::{Hardware, Readings, Relay},
    module::{Module, ModuleId, ModuleIo},
    settings::{
        SettingsRecord, FIELD_DRIVE_MODE, FIELD_MODULE_STATE, FIELD_MODULE_TYPE, FIELD_ZONE_ID,
    },
    supervisor::Supervisor,
    threshold::{Bounds, SwitchType, ThresholdSet, ThresholdSpec},
    timing::RestCycle,
};

pub const MODULE_TYPE: &str = "ThresholdSwitch";

const FIELD_DEVICE_STATE: &str = "deviceState";
const FIELD_T_THRESHOLD: &str = "tThreshold";
const FIELD_H_THRESHOLD: &str = "hThreshold";
const FIELD_MAX_ON_TIME: &str = "maxOnTime";
const FIELD_REST_TIME: &str = "restTime";
const FIELD_SWITCH_TYPE: &str = "switchType";
const FIELD_SENSOR_ID: &str = "sensorId";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_MODULE_TYPE,
    FIELD_ZONE_ID,
    FIELD_MODULE_STATE,
    FIELD_DEVICE_STATE,
    FIELD_DRIVE_MODE,
    FIELD_T_THRESHOLD,
    FIELD_H_THRESHOLD,
    FIELD_MAX_ON_TIME,
    FIELD_REST_TIME,
    FIELD_SWITCH_TYPE,
    FIELD_SENSOR_ID,
];

/// Ranges the feeding sensor can report, used to validate thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorBounds {
    pub temperature: Bounds,
    pub humidity: Bounds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSwitchConfig {
    pub drive_mode: u8,
    pub module_state: u8,
    pub t_threshold: f32,
    pub h_threshold: f32,
    pub max_on_time_s: u32,
    pub rest_time_s: u32,
    pub switch_type: u8,
}

impl Default for ThresholdSwitchConfig {
    fn default() -> Self {
        Self {
            drive_mode: DriveMode::Auto.code(),
            module_state: 1,
            t_threshold: ThresholdSpec::disabled().value,
            h_threshold: ThresholdSpec::disabled().value,
            max_on_time_s: 0,
            rest_time_s: 0,
            switch_type: SwitchType::AboveActivates.code(),
        }
    }
}

impl ThresholdSwitchConfig {
    pub fn drive_mode(&self) -> DriveMode {
        DriveMode::try_from(i64::from(self.drive_mode)).unwrap_or_default()
    }

    pub fn thresholds(&self) -> ThresholdSet {
        ThresholdSet {
            temperature: ThresholdSpec::new(self.t_threshold),
            humidity: ThresholdSpec::new(self.h_threshold),
            switch_type: SwitchType::try_from(i64::from(self.switch_type))
                .unwrap_or(SwitchType::AboveActivates),
        }
    }

    fn validate(&self, bounds: SensorBounds) -> Result<(), HiveError> {
        DriveMode::try_from(i64::from(self.drive_mode))?;
        SwitchType::try_from(i64::from(self.switch_type))?;
        if self.module_state > 1 {
            return Err(HiveError::invalid(format!(
                "moduleState {} is not 0 or 1",
                self.module_state
            )));
        }
        ThresholdSpec::new(self.t_threshold).validate(FIELD_T_THRESHOLD, bounds.temperature)?;
        ThresholdSpec::new(self.h_threshold).validate(FIELD_H_THRESHOLD, bounds.humidity)?;
        Ok(())
    }
}

impl StoredConfig for ThresholdSwitchConfig {
    const STORAGE_SIZE: usize = 19;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        writer.put_u8(self.drive_mode)?;
        writer.put_u8(self.module_state)?;
        writer.put_f32(self.t_threshold)?;
        writer.put_f32(self.h_threshold)?;
        writer.put_u32(self.max_on_time_s)?;
        writer.put_u32(self.rest_time_s)?;
        writer.put_u8(self.switch_type)
    }

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        Ok(Self {
            drive_mode: reader.get_u8()?,
            module_state: reader.get_u8()?,
            t_threshold: reader.get_f32()?,
            h_threshold: reader.get_f32()?,
            max_on_time_s: reader.get_u32()?,
            rest_time_s: reader.get_u32()?,
            switch_type: reader.get_u8()?,
        })
    }
}

pub struct ThresholdSwitch {
    supervisor: Supervisor,
    config: ThresholdSwitchConfig,
    defaults: ThresholdSwitchConfig,
    sensor: ModuleId,
    bounds: SensorBounds,
    relay: Relay,
    rest: RestCycle,
}

impl ThresholdSwitch {
    pub fn new(
        id: ModuleId,
        zone: u8,
        offset: usize,
        sensor: ModuleId,
        bounds: SensorBounds,
        relay: Relay,
        defaults: ThresholdSwitchConfig,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(id, zone, offset),
            config: defaults.clone(),
            defaults,
            sensor,
            bounds,
            relay,
            rest: RestCycle::new(0, 0),
        }
    }

    pub fn config(&self) -> &ThresholdSwitchConfig {
        &self.config
    }

    pub fn defaults(&self) -> &ThresholdSwitchConfig {
        &self.defaults
    }

    fn configure_rest(&mut self) {
        self.rest.configure(
            u64::from(self.config.max_on_time_s) * 1000,
            u64::from(self.config.rest_time_s) * 1000,
        );
    }

    /// Drives the relay to `on`, notifying when the physical state changes.
    fn drive_relay(&mut self, on: bool, io: &mut ModuleIo<'_>) {
        if self.relay.is_on(io.hardware) == on {
            return;
        }
        self.relay.set(io.hardware, on);
        info!(module = %self.supervisor.id(), on, "threshold switch relay changed");
        self.supervisor.notify(io.notifier);
    }

    /// Puts the relay where the current drive mode wants it, re-synchronising
    /// the rest cycle so a stale on-time is not carried into auto mode.
    fn enter_drive_mode(&mut self, io: &mut ModuleIo<'_>) {
        self.rest.reset();
        match self.config.drive_mode() {
            DriveMode::ManualOn => self.drive_relay(true, io),
            DriveMode::ManualOff => self.drive_relay(false, io),
            DriveMode::Auto => {}
        }
        self.supervisor.mark_dirty();
    }

    fn parse_request(&self, request: &SettingsRecord) -> Result<ThresholdSwitchConfig, HiveError> {
        request.require_module_type(MODULE_TYPE)?;
        request.ensure_known(KNOWN_FIELDS)?;
        let candidate = ThresholdSwitchConfig {
            drive_mode: request.require_int_in(FIELD_DRIVE_MODE, 0..=2)? as u8,
            module_state: u8::from(request.require_flag(FIELD_MODULE_STATE)?),
            t_threshold: request.require_float(FIELD_T_THRESHOLD)? as f32,
            h_threshold: request.require_float(FIELD_H_THRESHOLD)? as f32,
            max_on_time_s: request.require_int_in(FIELD_MAX_ON_TIME, 0..=i64::from(u32::MAX))?
                as u32,
            rest_time_s: request.require_int_in(FIELD_REST_TIME, 0..=i64::from(u32::MAX))? as u32,
            switch_type: request.require_int_in(FIELD_SWITCH_TYPE, 0..=1)? as u8,
        };
        candidate.validate(self.bounds)?;
        Ok(candidate)
    }
}

impl Module for ThresholdSwitch {
    fn id(&self) -> ModuleId {
        self.supervisor.id()
    }

    fn module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn storage_size(&self) -> usize {
        ThresholdSwitchConfig::STORAGE_SIZE
    }

    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError> {
        self.relay.setup(io.hardware);
        self.relay.set(io.hardware, false);
        self.config = self.defaults.clone();
        let bounds = self.bounds;
        let result = self
            .supervisor
            .init(io.storage, &mut self.config, load, |config| config.validate(bounds));
        self.configure_rest();

        if self.is_enabled() {
            self.enter_drive_mode(io);
        }
        result
    }

    fn tick(&mut self, io: &mut ModuleIo<'_>, readings: &Readings) {
        self.supervisor.retry_unsaved(io.storage, &self.config);
        if !self.is_enabled() {
            return;
        }
        let on = match self.config.drive_mode() {
            DriveMode::ManualOn => true,
            DriveMode::ManualOff => false,
            DriveMode::Auto => match readings.get(self.sensor).filter(|r| r.fresh) {
                Some(reading) => {
                    let active = self
                        .config
                        .thresholds()
                        .evaluate(reading.temperature, reading.humidity);
                    self.rest.gate(io.now_ms, active)
                }
                // No usable reading: hold the relay where it is, but still
                // within the rest cycle's on-time limit.
                None => {
                    let holding = self.relay.is_on(io.hardware);
                    self.rest.gate(io.now_ms, holding)
                }
            },
        };
        self.drive_relay(on, io);
    }

    fn expose_settings(&mut self, record: &mut SettingsRecord, hardware: &dyn Hardware) -> bool {
        if !self.supervisor.begin_exposure(record, MODULE_TYPE) {
            return false;
        }
        record.put(FIELD_MODULE_STATE, self.is_enabled());
        record.put(FIELD_DEVICE_STATE, self.relay.is_on(hardware));
        record.put(FIELD_DRIVE_MODE, self.config.drive_mode);
        record.put(FIELD_T_THRESHOLD, self.config.t_threshold);
        record.put(FIELD_H_THRESHOLD, self.config.h_threshold);
        record.put(FIELD_MAX_ON_TIME, self.config.max_on_time_s);
        record.put(FIELD_REST_TIME, self.config.rest_time_s);
        record.put(FIELD_SWITCH_TYPE, self.config.switch_type);
        record.put(FIELD_SENSOR_ID, self.sensor.0);
        true
    }

    fn apply_settings(
        &mut self,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        let candidate = self.parse_request(request)?;
        let enabled = candidate.module_state == 1;
        let mode_changed = candidate.drive_mode != self.config.drive_mode;
        let rest_changed = candidate.max_on_time_s != self.config.max_on_time_s
            || candidate.rest_time_s != self.config.rest_time_s;

        if enabled != self.is_enabled() {
            self.set_enabled(enabled, io)?;
        }
        if candidate == self.config {
            return Ok(());
        }

        self.config = candidate;
        if rest_changed {
            self.configure_rest();
        }
        if mode_changed && self.is_enabled() {
            self.enter_drive_mode(io);
        }
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError> {
        if enabled == self.is_enabled() {
            return Ok(());
        }
        self.config.module_state = u8::from(enabled);
        if enabled {
            self.enter_drive_mode(io);
        } else {
            self.drive_relay(false, io);
        }
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn is_enabled(&self) -> bool {
        self.config.module_state == 1
    }
}
