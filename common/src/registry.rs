//! Owns every module of a node and routes ticks, readings and settings
//! requests to them by `ModuleId`.

use std::fmt;

use tracing::{info, warn};

use crate::{
    error::HiveError,
    hardware::{Hardware, Readings},
    module::{Module, ModuleId, ModuleIo, PwmChannel},
    settings::SettingsRecord,
    storage::{has_saved_settings, mark_settings_saved},
};

struct Slot {
    module: Box<dyn Module>,
    record: SettingsRecord,
}

#[derive(Default)]
pub struct ModuleRegistry {
    slots: Vec<Slot>,
    readings: Readings,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.ids())
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Ids must be unique; tick order is registration order.
    pub fn register(&mut self, module: Box<dyn Module>) -> Result<ModuleId, HiveError> {
        let id = module.id();
        if self.position(id).is_some() {
            return Err(HiveError::invalid(format!("module id {id} registered twice")));
        }
        self.slots.push(Slot {
            module,
            record: SettingsRecord::new(),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        self.slots.iter().map(|slot| slot.module.id()).collect()
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn module(&self, id: ModuleId) -> Option<&dyn Module> {
        self.position(id).map(|index| self.slots[index].module.as_ref())
    }

    /// Initialises every module. Stored settings are loaded only when the
    /// storage header says they were written before; otherwise each module
    /// writes its defaults and the header is stamped. Returns whether settings
    /// were loaded.
    pub fn init_all(&mut self, io: &mut ModuleIo<'_>) -> Result<bool, HiveError> {
        let load = has_saved_settings(io.storage);
        info!(modules = self.slots.len(), load, "initialising modules");

        for slot in &mut self.slots {
            if let Err(err) = slot.module.init(io, load) {
                warn!(module = %slot.module.id(), error = %err, "module running on unsaved defaults");
            }
        }
        self.collect_readings();

        if !load {
            mark_settings_saved(io.storage)?;
        }
        Ok(load)
    }

    /// One pass over every module in order. A sensor's fresh reading is
    /// visible to the modules after it in the same pass.
    pub fn tick_all(&mut self, io: &mut ModuleIo<'_>) {
        for slot in &mut self.slots {
            slot.module.tick(io, &self.readings);
            if let Some(reading) = slot.module.reading() {
                self.readings.insert(slot.module.id(), reading);
            }
        }
    }

    /// Refreshes and returns the module's settings record.
    pub fn settings(
        &mut self,
        id: ModuleId,
        hardware: &dyn Hardware,
    ) -> Result<&SettingsRecord, HiveError> {
        let slot = self.slot_mut(id)?;
        slot.module.expose_settings(&mut slot.record, hardware);
        Ok(&slot.record)
    }

    pub fn all_settings(&mut self, hardware: &dyn Hardware) -> Vec<(ModuleId, SettingsRecord)> {
        self.slots
            .iter_mut()
            .map(|slot| {
                slot.module.expose_settings(&mut slot.record, hardware);
                (slot.module.id(), slot.record.clone())
            })
            .collect()
    }

    pub fn apply_settings(
        &mut self,
        id: ModuleId,
        request: &SettingsRecord,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        let slot = self.slot_mut(id)?;
        slot.module
            .apply_settings(request, io)
            .inspect_err(|err| warn!(module = %id, error = %err, "settings request rejected"))
    }

    pub fn set_enabled(
        &mut self,
        id: ModuleId,
        enabled: bool,
        io: &mut ModuleIo<'_>,
    ) -> Result<(), HiveError> {
        let slot = self.slot_mut(id)?;
        slot.module.set_enabled(enabled, io)?;
        if !enabled && slot.module.reading().is_some() {
            self.collect_readings();
        }
        Ok(())
    }

    pub fn pwm_channels(&self) -> Vec<(ModuleId, PwmChannel)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.module.pwm_channel().map(|ch| (slot.module.id(), ch)))
            .collect()
    }

    fn collect_readings(&mut self) {
        for slot in &self.slots {
            if let Some(reading) = slot.module.reading() {
                self.readings.insert(slot.module.id(), reading);
            }
        }
    }

    fn position(&self, id: ModuleId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.module.id() == id)
    }

    fn slot_mut(&mut self, id: ModuleId) -> Result<&mut Slot, HiveError> {
        let index = self.position(id).ok_or(HiveError::UnknownModule(id.0))?;
        Ok(&mut self.slots[index])
    }
}
