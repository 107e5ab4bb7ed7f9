//! Closed-loop floor heater with a weekly schedule and PI autotune.
//!
//! The control tick only computes an on-duration and publishes it through an
//! [`OutputCell`]; the relay itself is switched by whoever drives the
//! [`PwmChannel`] (a timer interrupt on the board, a fast task on the host).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    autotune::Autotune,
    codec::{RecordReader, RecordWriter, StoredConfig},
    error::HiveError,
    hardware::{Hardware, Readings, Relay, NO_READING},
    module::{Module, ModuleId, ModuleIo, PwmChannel},
    output::OutputCell,
    pid::{Gains, PidController},
    schedule::{ScheduleTable, SCHEDULE_STORAGE_SIZE},
    settings::{
        SettingsRecord, FIELD_DRIVE_MODE, FIELD_MODULE_STATE, FIELD_MODULE_TYPE, FIELD_ZONE_ID,
    },
    supervisor::Supervisor,
};

pub const MODULE_TYPE: &str = "FloorHeater";

pub const CONTROL_INTERVAL_MS: u64 = 1000;
pub const OUTPUT_MAX_MS: f32 = 10_000.0;

const DEFAULT_KP: f32 = 400.0;
const DEFAULT_KI: f32 = 0.001;
const DEFAULT_SETPOINT: f32 = 28.0;
const DEFAULT_STABLE_TIME_MS: u32 = 500_000;

const TUNE_STEADY_SAMPLES: u16 = 60;
const TUNE_NOISE: f32 = 0.4;

const FIELD_DEVICE_STATE: &str = "deviceState";
const FIELD_SETPOINT: &str = "setpoint";
const FIELD_TEMPERATURE: &str = "t";
const FIELD_T_MIN: &str = "tMin";
const FIELD_T_MAX: &str = "tMax";
const FIELD_KP: &str = "kP";
const FIELD_KI: &str = "kI";
const FIELD_STABLE_TIME: &str = "stableTime";
const FIELD_LAST_TUNING: &str = "lastTuning";
const FIELD_SCHEDULE: &str = "schedule";
const FIELD_DO_TUNING: &str = "doTuning";
const FIELD_RESET_TUNING: &str = "resetTuning";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_MODULE_TYPE,
    FIELD_ZONE_ID,
    FIELD_MODULE_STATE,
    FIELD_DRIVE_MODE,
    FIELD_DEVICE_STATE,
    FIELD_SETPOINT,
    FIELD_TEMPERATURE,
    FIELD_T_MIN,
    FIELD_T_MAX,
    FIELD_KP,
    FIELD_KI,
    FIELD_STABLE_TIME,
    FIELD_LAST_TUNING,
    FIELD_SCHEDULE,
    FIELD_DO_TUNING,
    FIELD_RESET_TUNING,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterMode {
    /// Heat to the setpoint of whichever schedule slot is active.
    Schedule,
    /// Always heat to the configured setpoint.
    Hold,
    #[default]
    Off,
}

impl HeaterMode {
    pub fn code(self) -> u8 {
        match self {
            Self::Schedule => 0,
            Self::Hold => 1,
            Self::Off => 2,
        }
    }
}

impl TryFrom<i64> for HeaterMode {
    type Error = HiveError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Schedule),
            1 => Ok(Self::Hold),
            2 => Ok(Self::Off),
            other => Err(HiveError::invalid(format!("driveMode {other} is not 0..=2"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Working,
    Tuning,
}

impl DeviceState {
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Working => 1,
            Self::Tuning => 2,
        }
    }
}

/// Setpoints the heated floor tolerates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointRange {
    pub t_min: f32,
    pub t_max: f32,
}

impl Default for SetpointRange {
    fn default() -> Self {
        Self {
            t_min: 23.0,
            t_max: 30.0,
        }
    }
}

impl SetpointRange {
    fn contains(&self, value: f32) -> bool {
        value.is_finite() && (self.t_min..=self.t_max).contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloorHeaterConfig {
    pub module_state: u8,
    pub drive_mode: u8,
    pub setpoint: f32,
    pub schedule: ScheduleTable,
    pub kp: f32,
    pub ki: f32,
    pub stable_time_ms: u32,
    /// Epoch seconds of the last completed tuning, 0 when never tuned.
    pub last_tuning: i64,
}

impl Default for FloorHeaterConfig {
    fn default() -> Self {
        Self {
            module_state: 1,
            drive_mode: HeaterMode::Off.code(),
            setpoint: DEFAULT_SETPOINT,
            schedule: ScheduleTable::default(),
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            stable_time_ms: DEFAULT_STABLE_TIME_MS,
            last_tuning: 0,
        }
    }
}

impl FloorHeaterConfig {
    pub fn mode(&self) -> HeaterMode {
        HeaterMode::try_from(i64::from(self.drive_mode)).unwrap_or_default()
    }

    pub fn gains(&self) -> Gains {
        Gains {
            kp: self.kp,
            ki: self.ki,
            kd: 0.0,
        }
    }

    fn reset_tuning(&mut self) {
        let defaults = Self::default();
        self.kp = defaults.kp;
        self.ki = defaults.ki;
        self.stable_time_ms = defaults.stable_time_ms;
        self.last_tuning = defaults.last_tuning;
    }

    fn validate(&self, range: SetpointRange) -> Result<(), HiveError> {
        HeaterMode::try_from(i64::from(self.drive_mode))?;
        if self.module_state > 1 {
            return Err(HiveError::invalid(format!(
                "moduleState {} is not 0 or 1",
                self.module_state
            )));
        }
        if !range.contains(self.setpoint) {
            return Err(HiveError::invalid(format!(
                "setpoint {} is outside {}..={}",
                self.setpoint, range.t_min, range.t_max
            )));
        }
        let usable = |gain: f32| gain.is_finite() && gain != 0.0;
        if !usable(self.kp) || !usable(self.ki) {
            return Err(HiveError::invalid("controller gains must be non-zero"));
        }
        if self.stable_time_ms == 0 {
            return Err(HiveError::invalid("stableTime must be non-zero"));
        }
        self.schedule.validate(range.t_min, range.t_max)
    }
}

impl StoredConfig for FloorHeaterConfig {
    const STORAGE_SIZE: usize = 1 + 1 + 4 + SCHEDULE_STORAGE_SIZE + 4 + 4 + 4 + 8;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        writer.put_u8(self.module_state)?;
        writer.put_u8(self.drive_mode)?;
        writer.put_f32(self.setpoint)?;
        self.schedule.encode(writer)?;
        writer.put_f32(self.kp)?;
        writer.put_f32(self.ki)?;
        writer.put_u32(self.stable_time_ms)?;
        writer.put_i64(self.last_tuning)
    }

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        Ok(Self {
            module_state: reader.get_u8()?,
            drive_mode: reader.get_u8()?,
            setpoint: reader.get_f32()?,
            schedule: ScheduleTable::decode(reader)?,
            kp: reader.get_f32()?,
            ki: reader.get_f32()?,
            stable_time_ms: reader.get_u32()?,
            last_tuning: reader.get_i64()?,
        })
    }
}

#[derive(Debug)]
enum Tuning {
    Idle,
    /// Waiting for the first fresh reading to anchor the experiment on.
    Requested,
    Running(Box<Autotune>),
}

pub struct FloorHeater {
    supervisor: Supervisor,
    config: FloorHeaterConfig,
    range: SetpointRange,
    sensor: ModuleId,
    relay: Relay,
    pid: PidController,
    tuning: Tuning,
    output: OutputCell,
    temperature: Option<f32>,
    controlling: bool,
    last_control_ms: Option<u64>,
}

impl FloorHeater {
    pub fn new(
        id: ModuleId,
        zone: u8,
        offset: usize,
        sensor: ModuleId,
        relay: Relay,
        range: SetpointRange,
    ) -> Self {
        let config = FloorHeaterConfig::default();
        let pid = PidController::new(
            config.gains(),
            0.0,
            OUTPUT_MAX_MS,
            CONTROL_INTERVAL_MS as u32,
        );
        Self {
            supervisor: Supervisor::new(id, zone, offset),
            config,
            range,
            sensor,
            relay,
            pid,
            tuning: Tuning::Idle,
            output: OutputCell::new(),
            temperature: None,
            controlling: false,
            last_control_ms: None,
        }
    }

    pub fn config(&self) -> &FloorHeaterConfig {
        &self.config
    }

    pub fn output(&self) -> &OutputCell {
        &self.output
    }

    pub fn is_tuning(&self) -> bool {
        !matches!(self.tuning, Tuning::Idle)
    }

    pub fn device_state(&self) -> DeviceState {
        if self.is_tuning() {
            DeviceState::Tuning
        } else if self.controlling {
            DeviceState::Working
        } else {
            DeviceState::Idle
        }
    }

    /// Setpoint to control to right now, if any.
    fn target(&self, io: &ModuleIo<'_>) -> Option<f32> {
        match self.config.mode() {
            HeaterMode::Off => None,
            HeaterMode::Hold => Some(self.config.setpoint),
            HeaterMode::Schedule => {
                let clock = io.clock?;
                self.config
                    .schedule
                    .active_slot(&clock, u64::from(self.config.stable_time_ms))
                    .map(|slot| slot.setpoint)
            }
        }
    }

    fn idle_output(&mut self) {
        self.controlling = false;
        self.pid.force_output(0.0);
        self.output.publish(0);
    }

    fn publish_output(&mut self) {
        self.output.publish(self.pid.output().round() as u32);
    }

    fn stop_tuning(&mut self) {
        self.tuning = Tuning::Idle;
        self.pid.force_output(0.0);
        self.pid.reset();
    }

    fn run_tuning(&mut self, io: &mut ModuleIo<'_>) {
        if matches!(self.tuning, Tuning::Requested) {
            info!(module = %self.supervisor.id(), "autotune started");
            self.tuning = Tuning::Running(Box::new(Autotune::new(
                &self.pid,
                TUNE_STEADY_SAMPLES,
                TUNE_NOISE,
                io.now_ms,
            )));
        }
        let Tuning::Running(tune) = &mut self.tuning else {
            return;
        };

        let finished = tune.tune_step(&mut self.pid, io.now_ms);
        let result = tune.result().copied();
        self.publish_output();
        if !finished {
            return;
        }

        self.stop_tuning();
        self.idle_output();
        if let Some(result) = result {
            self.config.kp = result.gains.kp;
            self.config.ki = result.gains.ki;
            self.config.stable_time_ms = result.stable_time_ms().max(1);
            self.config.last_tuning = io.clock.map(|clock| clock.epoch_secs).unwrap_or_default();
            if let Err(err) = self.supervisor.persist(io.storage, &self.config) {
                debug!(module = %self.supervisor.id(), error = %err, "tuned gains kept unsaved, retrying next tick");
            }
        }
        self.supervisor.notify(io.notifier);
    }

    fn control(&mut self, io: &mut ModuleIo<'_>) {
        let Some(setpoint) = self.target(io) else {
            if self.controlling {
                debug!(module = %self.supervisor.id(), "heater idle");
                self.supervisor.notify(io.notifier);
            }
            self.idle_output();
            return;
        };

        if !self.controlling {
            debug!(module = %self.supervisor.id(), setpoint, "heater working");
            self.pid.reset();
            self.controlling = true;
            self.supervisor.notify(io.notifier);
        }
        self.pid.set_setpoint(setpoint);
        if self.pid.compute(io.now_ms).is_some() {
            self.publish_output();
        }
    }

    fn parse_request(
        &self,
        request: &SettingsRecord,
    ) -> Result<(FloorHeaterConfig, Option<bool>, bool), HiveError> {
        request.require_module_type(MODULE_TYPE)?;
        request.ensure_known(KNOWN_FIELDS)?;
        let mut candidate = FloorHeaterConfig {
            module_state: u8::from(request.require_flag(FIELD_MODULE_STATE)?),
            drive_mode: request.require_int_in(FIELD_DRIVE_MODE, 0..=2)? as u8,
            setpoint: request.require_float(FIELD_SETPOINT)? as f32,
            schedule: request.require_schedule(FIELD_SCHEDULE)?,
            ..self.config.clone()
        };
        let do_tuning = request.optional_bool(FIELD_DO_TUNING)?;
        let reset_tuning = request.optional_bool(FIELD_RESET_TUNING)?.unwrap_or(false);
        if reset_tuning {
            candidate.reset_tuning();
        }
        candidate.validate(self.range)?;
        Ok((candidate, do_tuning, reset_tuning))
    }
}

impl Module for FloorHeater {
    fn id(&self) -> ModuleId {
        self.supervisor.id()
    }

    fn module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn storage_size(&self) -> usize {
        FloorHeaterConfig::STORAGE_SIZE
    }

    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError> {
        self.relay.setup(io.hardware);
        self.relay.set(io.hardware, false);
        self.config = FloorHeaterConfig::default();
        let range = self.range;
        let result = self
            .supervisor
            .init(io.storage, &mut self.config, load, |config| config.validate(range));
        self.pid.set_gains(self.config.gains());
        self.tuning = Tuning::Idle;
        self.idle_output();
        result
    }

    fn tick(&mut self, io: &mut ModuleIo<'_>, readings: &Readings) {
        self.supervisor.retry_unsaved(io.storage, &self.config);
        if !self.is_enabled() {
            return;
        }
        if self
            .last_control_ms
            .is_some_and(|last| io.now_ms.saturating_sub(last) < CONTROL_INTERVAL_MS)
        {
            return;
        }
        self.last_control_ms = Some(io.now_ms);

        let temperature = readings.fresh_temperature(self.sensor);
        if temperature != self.temperature {
            self.temperature = temperature;
            self.supervisor.mark_dirty();
        }
        let Some(temperature) = temperature else {
            if self.is_tuning() {
                warn!(module = %self.supervisor.id(), "sensor lost, autotune aborted");
                self.stop_tuning();
                self.supervisor.notify(io.notifier);
            }
            self.idle_output();
            return;
        };
        self.pid.set_input(temperature);

        if self.is_tuning() {
            self.run_tuning(io);
        } else {
            self.control(io);
        }
    }

    fn expose_settings(&mut self, record: &mut SettingsRecord, _hardware: &dyn Hardware) -> bool {
        if !self.supervisor.begin_exposure(record, MODULE_TYPE) {
            return false;
        }
        record.put(FIELD_MODULE_STATE, self.is_enabled());
        record.put(FIELD_DRIVE_MODE, self.config.drive_mode);
        record.put(FIELD_DEVICE_STATE, self.device_state().code());
        record.put(FIELD_SETPOINT, self.config.setpoint);
        record.put(FIELD_TEMPERATURE, self.temperature.unwrap_or(NO_READING));
        record.put(FIELD_T_MIN, self.range.t_min);
        record.put(FIELD_T_MAX, self.range.t_max);
        record.put(FIELD_KP, self.config.kp);
        record.put(FIELD_KI, self.config.ki);
        record.put(FIELD_STABLE_TIME, self.config.stable_time_ms);
        record.put(FIELD_LAST_TUNING, self.config.last_tuning);
        record.put(FIELD_SCHEDULE, self.config.schedule.clone());
        true
    }

    fn apply_settings(
        &mut self,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        let (candidate, do_tuning, reset_tuning) = self.parse_request(request)?;
        let enabled = candidate.module_state == 1;
        if enabled != self.is_enabled() {
            self.set_enabled(enabled, io)?;
        }

        match do_tuning {
            Some(true) if !self.is_tuning() && self.is_enabled() => {
                self.tuning = Tuning::Requested;
                self.supervisor.mark_dirty();
            }
            Some(false) if self.is_tuning() => {
                info!(module = %self.supervisor.id(), "autotune aborted");
                self.stop_tuning();
                self.idle_output();
                self.supervisor.mark_dirty();
            }
            _ => {}
        }

        if candidate == self.config {
            return Ok(());
        }
        if reset_tuning {
            info!(module = %self.supervisor.id(), "controller gains reset to defaults");
        }
        self.config = candidate;
        self.pid.set_gains(self.config.gains());
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError> {
        if enabled == self.is_enabled() {
            return Ok(());
        }
        self.config.module_state = u8::from(enabled);
        if !enabled {
            if self.is_tuning() {
                self.stop_tuning();
            }
            self.idle_output();
            self.relay.set(io.hardware, false);
        }
        self.last_control_ms = None;
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn is_enabled(&self) -> bool {
        self.config.module_state == 1
    }

    fn pwm_channel(&self) -> Option<PwmChannel> {
        Some(PwmChannel {
            output: self.output.clone(),
            relay: self.relay,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        clock::{DayOfWeek, WallClock},
        hardware::SensorReading,
        schedule::{PackedTime, ScheduleSlot},
        storage::Storage,
        testing::Bench,
    };

    const OFFSET: usize = 4;
    const SENSOR: ModuleId = ModuleId(1);
    const RELAY_PIN: u8 = 9;

    fn heater() -> FloorHeater {
        FloorHeater::new(
            ModuleId(5),
            0,
            OFFSET,
            SENSOR,
            Relay::active_high(RELAY_PIN),
            SetpointRange::default(),
        )
    }

    fn started(bench: &mut Bench) -> FloorHeater {
        let mut heater = heater();
        heater.init(&mut bench.io(0), false).unwrap();
        heater
    }

    fn floor_at(value: f32) -> Readings {
        let mut readings = Readings::default();
        readings.insert(
            SENSOR,
            SensorReading {
                temperature: Some(value),
                humidity: None,
                fresh: true,
            },
        );
        readings
    }

    fn request(config: &FloorHeaterConfig) -> SettingsRecord {
        SettingsRecord::new()
            .with(FIELD_MODULE_TYPE, MODULE_TYPE)
            .with(FIELD_MODULE_STATE, config.module_state)
            .with(FIELD_DRIVE_MODE, config.drive_mode)
            .with(FIELD_SETPOINT, config.setpoint)
            .with(FIELD_SCHEDULE, config.schedule.clone())
    }

    fn monday_morning() -> ScheduleTable {
        let mut schedule = ScheduleTable::default();
        schedule.set_slot(
            DayOfWeek::Mon,
            0,
            ScheduleSlot::new(PackedTime::new(8, 0), PackedTime::new(10, 0), 24.0),
        );
        schedule
    }

    #[test]
    fn off_by_default_publishes_nothing() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);

        heater.tick(&mut bench.io(1_000), &floor_at(20.0));
        assert_eq!(heater.output().load(), 0);
        assert_eq!(heater.device_state(), DeviceState::Idle);
    }

    #[test]
    fn hold_mode_drives_output_within_window() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let hold = FloorHeaterConfig {
            drive_mode: HeaterMode::Hold.code(),
            setpoint: 25.0,
            ..FloorHeaterConfig::default()
        };
        heater.apply_settings(&request(&hold), &mut bench.io(0)).unwrap();

        heater.tick(&mut bench.io(1_000), &floor_at(20.0));
        let first = heater.output().load();
        assert!(first > 0 && first <= 10_000);
        assert_eq!(heater.device_state(), DeviceState::Working);

        // Far below the setpoint the output saturates at the window length.
        for second in 2..20 {
            heater.tick(&mut bench.io(second * 1_000), &floor_at(0.0));
        }
        assert_eq!(heater.output().load(), 10_000);
    }

    #[test]
    fn schedule_mode_follows_active_slot() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let scheduled = FloorHeaterConfig {
            drive_mode: HeaterMode::Schedule.code(),
            schedule: monday_morning(),
            ..FloorHeaterConfig::default()
        };
        heater
            .apply_settings(&request(&scheduled), &mut bench.io(0))
            .unwrap();

        bench.clock = Some(WallClock::new(DayOfWeek::Mon, 9, 0));
        heater.tick(&mut bench.io(1_000), &floor_at(20.0));
        assert!(heater.output().load() > 0);
        assert_eq!(heater.pid.setpoint(), 24.0);

        bench.clock = Some(WallClock::new(DayOfWeek::Mon, 11, 0));
        heater.tick(&mut bench.io(2_000), &floor_at(20.0));
        assert_eq!(heater.output().load(), 0);
        assert_eq!(heater.device_state(), DeviceState::Idle);
    }

    #[test]
    fn stale_sensor_publishes_zero() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let hold = FloorHeaterConfig {
            drive_mode: HeaterMode::Hold.code(),
            setpoint: 25.0,
            ..FloorHeaterConfig::default()
        };
        heater.apply_settings(&request(&hold), &mut bench.io(0)).unwrap();
        heater.tick(&mut bench.io(1_000), &floor_at(20.0));
        assert!(heater.output().load() > 0);

        heater.tick(&mut bench.io(2_000), &Readings::default());
        assert_eq!(heater.output().load(), 0);
    }

    #[test]
    fn tuning_can_be_aborted_without_touching_gains() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let config = FloorHeaterConfig::default();

        heater
            .apply_settings(
                &request(&config).with(FIELD_DO_TUNING, true),
                &mut bench.io(0),
            )
            .unwrap();
        heater.tick(&mut bench.io(1_000), &floor_at(20.0));
        assert_eq!(heater.device_state(), DeviceState::Tuning);
        assert_eq!(heater.output().load(), 5_000);

        heater
            .apply_settings(
                &request(&config).with(FIELD_DO_TUNING, false),
                &mut bench.io(1_500),
            )
            .unwrap();
        assert_eq!(heater.device_state(), DeviceState::Idle);
        assert_eq!(heater.output().load(), 0);
        assert_eq!(heater.config().gains(), config.gains());
    }

    #[test]
    fn completed_tuning_writes_back_gains() {
        let mut bench = Bench::default();
        bench.clock = Some(WallClock {
            epoch_secs: 1_767_600_000,
            ..WallClock::new(DayOfWeek::Mon, 9, 0)
        });
        let mut heater = started(&mut bench);
        heater
            .apply_settings(
                &request(&FloorHeaterConfig::default()).with(FIELD_DO_TUNING, true),
                &mut bench.io(0),
            )
            .unwrap();

        // First-order floor: settles at 20 °C plus a degree per 1000 ms of on-time.
        let mut floor = 20.0f32;
        let mut now = 1_000;
        while heater.is_tuning() && now < 10_000_000 {
            heater.tick(&mut bench.io(now), &floor_at(floor));
            let target = 20.0 + heater.output().load() as f32 * 0.001;
            floor += (target - floor) * 0.2;
            now += 1_000;
        }

        assert!(!heater.is_tuning());
        let tuned = heater.config().clone();
        assert_ne!(tuned.kp, DEFAULT_KP);
        assert_ne!(tuned.stable_time_ms, DEFAULT_STABLE_TIME_MS);
        assert_eq!(tuned.last_tuning, 1_767_600_000);

        let mut reloaded = self::heater();
        reloaded.init(&mut bench.io(0), true).unwrap();
        assert_eq!(reloaded.config(), &tuned);
    }

    #[test]
    fn reset_tuning_restores_default_gains() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let tuned = FloorHeaterConfig {
            kp: 120.0,
            ki: 0.02,
            stable_time_ms: 90_000,
            last_tuning: 42,
            ..FloorHeaterConfig::default()
        };
        bench.storage.write(OFFSET, &tuned.to_bytes().unwrap()).unwrap();
        heater.init(&mut bench.io(0), true).unwrap();
        assert_eq!(heater.config(), &tuned);

        heater
            .apply_settings(
                &request(&tuned).with(FIELD_RESET_TUNING, true),
                &mut bench.io(0),
            )
            .unwrap();
        assert_eq!(heater.config(), &FloorHeaterConfig::default());
    }

    #[test]
    fn setpoint_outside_range_resets_stored_settings() {
        let mut bench = Bench::default();
        let corrupt = FloorHeaterConfig {
            setpoint: 40.0,
            drive_mode: HeaterMode::Hold.code(),
            ..FloorHeaterConfig::default()
        };
        bench.storage.write(OFFSET, &corrupt.to_bytes().unwrap()).unwrap();

        let mut heater = heater();
        heater.init(&mut bench.io(0), true).unwrap();
        assert_eq!(heater.config(), &FloorHeaterConfig::default());
    }

    #[test]
    fn invalid_schedule_rejects_whole_request() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let mut schedule = monday_morning();
        schedule.set_slot(
            DayOfWeek::Tue,
            1,
            ScheduleSlot::new(PackedTime::new(10, 0), PackedTime::new(8, 0), 24.0),
        );
        let bad = FloorHeaterConfig {
            drive_mode: HeaterMode::Hold.code(),
            schedule,
            ..FloorHeaterConfig::default()
        };

        let err = heater.apply_settings(&request(&bad), &mut bench.io(0)).unwrap_err();
        assert!(err.is_invalid_settings());
        assert_eq!(heater.config(), &FloorHeaterConfig::default());
    }

    #[test]
    fn schedule_survives_save_and_load() {
        let mut bench = Bench::default();
        let mut heater = started(&mut bench);
        let config = FloorHeaterConfig {
            drive_mode: HeaterMode::Schedule.code(),
            setpoint: 26.5,
            schedule: monday_morning(),
            ..FloorHeaterConfig::default()
        };
        heater.apply_settings(&request(&config), &mut bench.io(0)).unwrap();

        let mut reloaded = self::heater();
        reloaded.init(&mut bench.io(0), true).unwrap();
        assert_eq!(reloaded.config(), &config);

        let mut record = SettingsRecord::new();
        assert!(reloaded.expose_settings(&mut record, &bench.hardware));
        assert_eq!(
            record.require_schedule(FIELD_SCHEDULE).unwrap(),
            monday_morning()
        );
        assert_eq!(record.require_int(FIELD_DEVICE_STATE), Ok(0));
    }
}
