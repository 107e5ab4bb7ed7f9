//! Light driven by a wall switch, with optional fallback relay.
//!
//! The fallback relay is normally closed and wired so that the wall switch
//! drives the light directly. It is energised (opened) while the module is
//! enabled, handing the light over to the controller.

use tracing::{debug, info};

use crate::{
    codec::{RecordReader, RecordWriter, StoredConfig},
    drive::{DriveMode, FlipCounter},
    error::HiveError,
    hardware::{DigitalInput, Hardware, Readings, Relay},
    module::{Module, ModuleId, ModuleIo},
    settings::{
        SettingsRecord, FIELD_DRIVE_MODE, FIELD_MODULE_STATE, FIELD_MODULE_TYPE, FIELD_ZONE_ID,
    },
    supervisor::Supervisor,
    timing::Debounce,
};

pub const MODULE_TYPE: &str = "WallSwitch";
pub const DEBOUNCE_MS: u64 = 20;

const FIELD_SWITCH_STATE: &str = "switchState";
const FIELD_LIGHT_STATE: &str = "lightState";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_MODULE_TYPE,
    FIELD_ZONE_ID,
    FIELD_MODULE_STATE,
    FIELD_DRIVE_MODE,
    FIELD_SWITCH_STATE,
    FIELD_LIGHT_STATE,
];

#[derive(Debug, Clone, PartialEq)]
pub struct WallSwitchConfig {
    pub drive_mode: u8,
    pub module_state: u8,
}

impl Default for WallSwitchConfig {
    fn default() -> Self {
        Self {
            drive_mode: DriveMode::Auto.code(),
            module_state: 1,
        }
    }
}

impl WallSwitchConfig {
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

impl StoredConfig for WallSwitchConfig {
    const STORAGE_SIZE: usize = 2;

    fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        writer.put_u8(self.drive_mode)?;
        writer.put_u8(self.module_state)
    }

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        Ok(Self {
            drive_mode: reader.get_u8()?,
            module_state: reader.get_u8()?,
        })
    }
}

pub struct WallSwitch {
    supervisor: Supervisor,
    config: WallSwitchConfig,
    switch: DigitalInput,
    light: Relay,
    fallback: Option<Relay>,
    debounce: Debounce,
    flips: FlipCounter,
}

impl WallSwitch {
    pub fn new(
        id: ModuleId,
        zone: u8,
        offset: usize,
        switch: DigitalInput,
        light: Relay,
        fallback: Option<Relay>,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(id, zone, offset),
            config: WallSwitchConfig::default(),
            switch,
            light,
            fallback,
            debounce: Debounce::new(false, DEBOUNCE_MS),
            flips: FlipCounter::default(),
        }
    }

    pub fn config(&self) -> &WallSwitchConfig {
        &self.config
    }

    fn drive_light(&mut self, on: bool, io: &mut ModuleIo<'_>) {
        if self.light.is_on(io.hardware) == on {
            return;
        }
        self.light.set(io.hardware, on);
        info!(module = %self.supervisor.id(), on, "light switched");
        self.supervisor.notify(io.notifier);
    }

    /// Applies the current drive mode to the light. Auto mode adopts the
    /// switch position as already debounced so it is not seen as a flip.
    fn enter_drive_mode(&mut self, io: &mut ModuleIo<'_>) {
        self.flips.clear();
        let switch_on = self.switch.is_active(io.hardware);
        self.debounce.resync(switch_on);
        let mode = self.config.drive_mode();
        self.drive_light(mode.desired(switch_on), io);
        self.supervisor.mark_dirty();
    }

    fn set_fallback(&self, engaged: bool, hardware: &mut dyn Hardware) {
        if let Some(fallback) = &self.fallback {
            fallback.set(hardware, engaged);
        }
    }
}

impl Module for WallSwitch {
    fn id(&self) -> ModuleId {
        self.supervisor.id()
    }

    fn module_type(&self) -> &'static str {
        MODULE_TYPE
    }

    fn storage_size(&self) -> usize {
        WallSwitchConfig::STORAGE_SIZE
    }

    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError> {
        self.switch.setup(io.hardware);
        self.light.setup(io.hardware);
        self.light.set(io.hardware, false);
        if let Some(fallback) = &self.fallback {
            fallback.setup(io.hardware);
        }
        self.config = WallSwitchConfig::default();
        let result = self
            .supervisor
            .init(io.storage, &mut self.config, load, WallSwitchConfig::validate);

        self.set_fallback(self.is_enabled(), io.hardware);
        if self.is_enabled() {
            self.enter_drive_mode(io);
        }
        result
    }

    fn tick(&mut self, io: &mut ModuleIo<'_>, _readings: &Readings) {
        self.supervisor.retry_unsaved(io.storage, &self.config);
        if !self.is_enabled() {
            return;
        }
        let raw = self.switch.is_active(io.hardware);
        let Some(switch_on) = self.debounce.update(io.now_ms, raw) else {
            return;
        };

        let mode = self.config.drive_mode();
        if mode.is_manual() {
            if !self.flips.register() {
                return;
            }
            info!(module = %self.supervisor.id(), "double flip, returning to auto mode");
            self.config.drive_mode = DriveMode::Auto.code();
            if let Err(err) = self.supervisor.persist(io.storage, &self.config) {
                debug!(module = %self.supervisor.id(), error = %err, "auto mode kept unsaved, retrying next tick");
            }
            self.supervisor.notify(io.notifier);
        }
        self.drive_light(switch_on, io);
    }

    fn expose_settings(&mut self, record: &mut SettingsRecord, hardware: &dyn Hardware) -> bool {
        if !self.supervisor.begin_exposure(record, MODULE_TYPE) {
            return false;
        }
        record.put(FIELD_MODULE_STATE, self.is_enabled());
        record.put(FIELD_DRIVE_MODE, self.config.drive_mode);
        record.put(FIELD_SWITCH_STATE, self.debounce.stable());
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
        let candidate = WallSwitchConfig {
            drive_mode: request.require_int_in(FIELD_DRIVE_MODE, 0..=2)? as u8,
            module_state: u8::from(request.require_flag(FIELD_MODULE_STATE)?),
        };
        candidate.validate()?;

        let enabled = candidate.module_state == 1;
        if enabled != self.is_enabled() {
            self.set_enabled(enabled, io)?;
        }
        if candidate.drive_mode != self.config.drive_mode {
            self.config.drive_mode = candidate.drive_mode;
            if self.is_enabled() {
                self.enter_drive_mode(io);
            }
            self.supervisor.persist(io.storage, &self.config)?;
        }
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError> {
        if enabled == self.is_enabled() {
            return Ok(());
        }
        self.config.module_state = u8::from(enabled);
        self.set_fallback(enabled, io.hardware);
        if enabled {
            self.enter_drive_mode(io);
        } else {
            self.drive_light(false, io);
        }
        self.supervisor.mark_dirty();
        self.supervisor.persist(io.storage, &self.config)
    }

    fn is_enabled(&self) -> bool {
        self.config.module_state == 1
    }
}
