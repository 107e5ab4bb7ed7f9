use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    clock::WallClock,
    error::HiveError,
    hardware::{Hardware, Readings, Relay, SensorReading},
    notify::Notifier,
    output::OutputCell,
    settings::SettingsRecord,
    storage::Storage,
};

/// Stable, 1-based module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u8);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collaborators lent to a module for the duration of one call.
pub struct ModuleIo<'a> {
    pub now_ms: u64,
    pub clock: Option<WallClock>,
    pub hardware: &'a mut dyn Hardware,
    pub storage: &'a mut dyn Storage,
    pub notifier: &'a mut dyn Notifier,
}

/// Relay driven from a published on-duration rather than from the tick.
#[derive(Debug, Clone)]
pub struct PwmChannel {
    pub output: OutputCell,
    pub relay: Relay,
}

pub trait Module: Send {
    fn id(&self) -> ModuleId;
    fn module_type(&self) -> &'static str;
    fn storage_size(&self) -> usize;

    /// Sets up pins, then restores persisted settings when `load` is set or
    /// writes the defaults otherwise. An error means the defaults could not
    /// be persisted; the module runs on them regardless.
    fn init(&mut self, io: &mut ModuleIo<'_>, load: bool) -> Result<(), HiveError>;

    fn tick(&mut self, io: &mut ModuleIo<'_>, readings: &Readings);

    /// Writes every field into `record` when it is empty, belongs to another
    /// module type, or the module changed since the last call. Returns
    /// whether the record was touched.
    fn expose_settings(&mut self, record: &mut SettingsRecord, hardware: &dyn Hardware) -> bool;

    /// Validates the whole request before changing anything.
    fn apply_settings(
        &mut self,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError>;

    fn set_enabled(&mut self, enabled: bool, io: &mut ModuleIo<'_>) -> Result<(), HiveError>;

    fn is_enabled(&self) -> bool;

    /// Latest measurement, for modules that are sensors.
    fn reading(&self) -> Option<SensorReading> {
        None
    }

    fn pwm_channel(&self) -> Option<PwmChannel> {
        None
    }
}
