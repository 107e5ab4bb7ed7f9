//! Motion-activated light.

use tracing::debug;

use crate::{
    codec::{RecordReader, RecordWriter, StoredConfig},
    drive::DriveMode,
    error::HiveError,
    hardware::{DigitalInput, Hardware, Readings, Relay},
    module::{Module, ModuleId, ModuleIo},
    settings::{
        SettingsRecord, FIELD_DRIVE_MODE, FIELD_MODULE_STATE, FIELD_MODULE_TYPE, FIELD_ZONE_ID,
    },
    supervisor::Supervisor,
};

pub const MODULE_TYPE: &str = "PirSwitch";

const FIELD_PIR_DELAY: &str = "pirDelay";
const FIELD_MOTION: &str = "motion";
const FIELD_LIGHT_STATE: &str = "lightState";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_MODULE_TYPE,
    FIELD_ZONE_ID,
    FIELD_MODULE_STATE,
    FIELD_DRIVE_MODE,
    FIELD_PIR_DELAY,
    FIELD_MOTION,
    FIELD_LIGHT_STATE,
];

#[derive(Debug, Clone, PartialEq)]
pub struct PirSwitchConfig {
    pub drive_mode: u8,
    /// Seconds the light stays on after the last motion.
    pub pir_delay_s: u8,
    pub module_state: u8,
}

impl Default for PirSwitchConfig {
    fn default() -> Self {
        Self {
            drive_mode: DriveMode::Auto.code(),
            pir_delay_s: 10,
            module_state: 1,
        }
    }
}

impl PirSwitchConfig {
    pub fn drive_mode(&self) -> DriveMode {
        DriveMode::try_from(i64::from(self.drive_mode)).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), HiveError> {
        DriveMode::try_from(i64::from(self.drive_mode))?;
        if self.module_state > 1 {
            return Err(HiveError::invalid(format!(
                "moduleState {} is not 0 or 1",
                self.module_state
            )));
        }
        Ok(())
    }
}

impl StoredConfig for PirSwitchConfig {
    const STORAGE_SIZE: usize = 3;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        writer.put_u8(self.drive_mode)?;
        writer.put_u8(self.pir_delay_s)?;
        writer.put_u8(self.module_state)
    }

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        Ok(Self {
            drive_mode: reader.get_u8()?,
            pir_delay_s: reader.get_u8()?,
            module_state: reader.get_u8()?,
        })
    }
}

pub struct PirSwitch {
    supervisor: Supervisor,
    config: PirSwitchConfig,
    sensor: DigitalInput,
    light: Relay,
    last_motion_ms: Option<u64>,
}

impl PirSwitch {
    pub fn new(id: ModuleId, zone: u8, offset: usize, sensor: DigitalInput, light: Relay) -> Self {
        Self {
            supervisor: Supervisor::new(id, zone, offset),
            config: PirSwitchConfig::default(),
            sensor,
            light,
            last_motion_ms: None,
        }
    }

    pub fn config(&self) -> &PirSwitchConfig {
        &self.config
    }

    fn drive_light(&mut self, on: bool, io: &mut ModuleIo<'_>) {
        if self.light.is_on(io.hardware) == on {
            return;
        }
        self.light.set(io.hardware, on);
        debug!(module = %self.supervisor.id(), on, "pir light switched");
        self.supervisor.notify(io.notifier);
    }

    fn auto_light(&mut self, now_ms: u64, motion: bool) -> bool {
        if motion {
            self.last_motion_ms = Some(now_ms);
            return true;
        }
        let delay_ms = u64::from(self.config.pir_delay_s) * 1000;
        self.last_motion_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < delay_ms)
    }
}

impl Module for PirSwitch {
    fn id(&self) -> ModuleId {
        self.supervisor.id()
    }

    fn module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn storage_size(&self) -> usize {
        PirSwitchConfig::STORAGE_SIZE
    }

    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError> {
        self.sensor.setup(io.hardware);
        self.light.setup(io.hardware);
        self.light.set(io.hardware, false);
        self.config = PirSwitchConfig::default();
        self.supervisor
            .init(io.storage, &mut self.config, load, PirSwitchConfig::validate)
    }

    fn tick(&mut self, io: &mut ModuleIo<'_>, _readings: &Readings) {
        self.supervisor.retry_unsaved(io.storage, &self.config);
        if !self.is_enabled() {
            return;
        }
        let on = match self.config.drive_mode() {
            DriveMode::Auto => {
                let motion = self.sensor.is_active(io.hardware);
                self.auto_light(io.now_ms, motion)
            }
            manual => manual.desired(false),
        };
        self.drive_light(on, io);
    }

    fn expose_settings(&mut self, record: &mut SettingsRecord, hardware: &dyn Hardware) -> bool {
        if !self.supervisor.begin_exposure(record, MODULE_TYPE) {
            return false;
        }
        record.put(FIELD_MODULE_STATE, self.is_enabled());
        record.put(FIELD_DRIVE_MODE, self.config.drive_mode);
        record.put(FIELD_PIR_DELAY, self.config.pir_delay_s);
        record.put(FIELD_MOTION, self.sensor.is_active(hardware));
        record.put(FIELD_LIGHT_STATE, self.light.is_on(hardware));
        true
    }

    fn apply_settings(
        &mut self,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        request.require_module_type(MODULE_TYPE)?;
        request.ensure_known(KNOWN_FIELDS)?;
        let candidate = PirSwitchConfig {
            drive_mode: request.require_int_in(FIELD_DRIVE_MODE, 0..=2)? as u8,
            pir_delay_s: request.require_int_in(FIELD_PIR_DELAY, 0..=255)? as u8,
            module_state: u8::from(request.require_flag(FIELD_MODULE_STATE)?),
        };
        candidate.validate()?;

        let enabled = candidate.module_state == 1;
        if enabled != self.is_enabled() {
            self.set_enabled(enabled, io)?;
        }
        if candidate == self.config {
            return Ok(());
        }
        if candidate.drive_mode != self.config.drive_mode {
            // Leaving a manual mode must not replay motion seen before it.
            self.last_motion_ms = None;
        }
        self.config = candidate;
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError> {
        if enabled == self.is_enabled() {
            return Ok(());
        }
        self.config.module_state = u8::from(enabled);
        self.last_motion_ms = None;
        if !enabled {
            self.drive_light(false, io);
        }
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn is_enabled(&self) -> bool {
        self.config.module_state == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Bench;

    const PIR_PIN: u8 = 5;
    const LIGHT_PIN: u8 = 11;

    fn started(bench: &mut Bench) -> PirSwitch {
        let mut pir = PirSwitch::new(
            ModuleId(4),
            0,
            4,
            DigitalInput {
                pin: PIR_PIN,
                pullup: false,
            },
            Relay::active_low(LIGHT_PIN),
        );
        pir.init(&mut bench.io(0), false).unwrap();
        pir
    }

    fn light_on(bench: &Bench) -> bool {
        Relay::active_low(LIGHT_PIN).is_on(&bench.hardware)
    }

    #[test]
    fn motion_holds_light_for_delay() {
        let mut bench = Bench::default();
        let mut pir = started(&mut bench);

        bench.hardware.set_level(PIR_PIN, true);
        pir.tick(&mut bench.io(1_000), &Readings::default());
        assert!(light_on(&bench));

        bench.hardware.set_level(PIR_PIN, false);
        pir.tick(&mut bench.io(10_999), &Readings::default());
        assert!(light_on(&bench));

        pir.tick(&mut bench.io(11_000), &Readings::default());
        assert!(!light_on(&bench));
        assert_eq!(bench.notifier.drain(), vec![ModuleId(4)]);
    }

    #[test]
    fn fresh_motion_extends_delay() {
        let mut bench = Bench::default();
        let mut pir = started(&mut bench);

        bench.hardware.set_level(PIR_PIN, true);
        pir.tick(&mut bench.io(0), &Readings::default());
        pir.tick(&mut bench.io(8_000), &Readings::default());
        bench.hardware.set_level(PIR_PIN, false);

        pir.tick(&mut bench.io(12_000), &Readings::default());
        assert!(light_on(&bench));
        pir.tick(&mut bench.io(18_000), &Readings::default());
        assert!(!light_on(&bench));
    }

    #[test]
    fn manual_off_ignores_motion() {
        let mut bench = Bench::default();
        let mut pir = started(&mut bench);
        let request = SettingsRecord::new()
            .with(FIELD_MODULE_TYPE, MODULE_TYPE)
            .with(FIELD_MODULE_STATE, true)
            .with(FIELD_DRIVE_MODE, DriveMode::ManualOff.code())
            .with(FIELD_PIR_DELAY, 30);
        pir.apply_settings(&request, &mut bench.io(0)).unwrap();

        bench.hardware.set_level(PIR_PIN, true);
        pir.tick(&mut bench.io(1_000), &Readings::default());
        assert!(!light_on(&bench));
        assert_eq!(pir.config().pir_delay_s, 30);
    }

    #[test]
    fn out_of_range_delay_is_rejected() {
        let mut bench = Bench::default();
        let mut pir = started(&mut bench);
        let request = SettingsRecord::new()
            .with(FIELD_MODULE_TYPE, MODULE_TYPE)
            .with(FIELD_MODULE_STATE, true)
            .with(FIELD_DRIVE_MODE, DriveMode::ManualOn.code())
            .with(FIELD_PIR_DELAY, 300);

        assert!(pir
            .apply_settings(&request, &mut bench.io(0))
            .unwrap_err()
            .is_invalid_settings());
        assert_eq!(pir.config(), &PirSwitchConfig::default());
    }
}
