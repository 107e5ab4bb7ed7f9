//! Load, validate, reset and save lifecycle shared by every module.

use tracing::{debug, warn};

use crate::{
    codec::StoredConfig,
    error::HiveError,
    module::ModuleId,
    notify::Notifier,
    settings::{SettingsRecord, FIELD_MODULE_TYPE, FIELD_ZONE_ID},
    storage::Storage,
};

#[derive(Debug, Clone)]
pub struct Supervisor {
    id: ModuleId,
    zone: u8,
    offset: usize,
    dirty: bool,
    /// Set while the live settings differ from storage after a failed save.
    unsaved: bool,
}

impl Supervisor {
    pub fn new(id: ModuleId, zone: u8, offset: usize) -> Self {
        Self {
            id,
            zone,
            offset,
            dirty: true,
            unsaved: false,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Restores `config` from storage, or persists the values it already
    /// holds when `load` is false.
    pub fn init<C: StoredConfig>(
        &mut self,
        storage: &mut dyn Storage,
        config: &mut C,
        load: bool,
        validate: impl FnOnce(&C) -> Result<(), HiveError>,
    ) -> Result<(), HiveError> {
        if load {
            self.restore(storage, config, validate)
        } else {
            self.persist(storage, config)
        }
    }

    /// Replaces `config` with the stored record when it reads back and
    /// validates. Otherwise `config` keeps the defaults it was given and
    /// they are written back over the bad record.
    pub fn restore<C: StoredConfig>(
        &mut self,
        storage: &mut dyn Storage,
        config: &mut C,
        validate: impl FnOnce(&C) -> Result<(), HiveError>,
    ) -> Result<(), HiveError> {
        self.dirty = true;
        let stored = storage
            .read(self.offset, C::STORAGE_SIZE)
            .and_then(|bytes| C::from_bytes(&bytes))
            .and_then(|stored| validate(&stored).map(|()| stored));

        match stored {
            Ok(stored) => {
                *config = stored;
                debug!(module = %self.id, offset = self.offset, "settings loaded");
                Ok(())
            }
            Err(err) => {
                warn!(module = %self.id, error = %err, "stored settings rejected, restoring defaults");
                self.persist(storage, config)
            }
        }
    }

    pub fn persist<C: StoredConfig>(
        &mut self,
        storage: &mut dyn Storage,
        config: &C,
    ) -> Result<(), HiveError> {
        self.dirty = true;
        let result = self
            .write(storage, config)
            .inspect_err(|err| warn!(module = %self.id, error = %err, "failed to save settings"));
        self.unsaved = result.is_err();
        result
    }

    /// Saves `config` again when the last save failed. Repeated failures are
    /// not logged; the first one already was.
    pub fn retry_unsaved<C: StoredConfig>(&mut self, storage: &mut dyn Storage, config: &C) {
        if self.unsaved && self.write(storage, config).is_ok() {
            self.unsaved = false;
            debug!(module = %self.id, "settings saved after an earlier failure");
        }
    }

    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    fn write<C: StoredConfig>(&self, storage: &mut dyn Storage, config: &C) -> Result<(), HiveError> {
        let bytes = config.to_bytes()?;
        storage.write(self.offset, &bytes)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Decides whether a settings record needs refreshing. A record that is
    /// empty or holds another module type is cleared and seeded with the
    /// identity fields so the caller can write every field in order.
    pub fn begin_exposure(&mut self, record: &mut SettingsRecord, module_type: &'static str) -> bool {
        if record.module_type() != Some(module_type) {
            *record = SettingsRecord::new()
                .with(FIELD_MODULE_TYPE, module_type)
                .with(FIELD_ZONE_ID, self.zone);
        } else if !self.dirty {
            return false;
        }
        self.dirty = false;
        true
    }

    pub fn notify(&mut self, notifier: &mut dyn Notifier) {
        self.dirty = true;
        notifier.notify(self.id);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        codec::{RecordReader, RecordWriter},
        notify::NotificationQueue,
        storage::MemoryStorage,
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        mode: u8,
        level: f32,
    }

    impl StoredConfig for Sample {
        const STORAGE_SIZE: usize = 5;

        fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
            writer.put_u8(self.mode)?;
            writer.put_f32(self.level)
        }

        fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
            Ok(Self {
                mode: reader.get_u8()?,
                level: reader.get_f32()?,
            })
        }
    }

    fn validate(sample: &Sample) -> Result<(), HiveError> {
        if sample.mode > 2 {
            return Err(HiveError::invalid("mode"));
        }
        Ok(())
    }

    fn defaults() -> Sample {
        Sample {
            mode: 0,
            level: 1.5,
        }
    }

    #[test]
    fn erased_storage_resets_and_repersists() {
        let mut storage = MemoryStorage::new(32);
        let mut supervisor = Supervisor::new(ModuleId(1), 0, 4);
        let mut config = defaults();

        supervisor
            .init(&mut storage, &mut config, true, validate)
            .unwrap();

        assert_eq!(config, defaults());
        assert_eq!(&storage.bytes()[4..9], defaults().to_bytes().unwrap().as_slice());
    }

    #[test]
    fn valid_record_is_restored() {
        let mut storage = MemoryStorage::new(32);
        let saved = Sample {
            mode: 2,
            level: -3.0,
        };
        storage.write(4, &saved.to_bytes().unwrap()).unwrap();

        let mut supervisor = Supervisor::new(ModuleId(1), 0, 4);
        let mut config = defaults();
        supervisor.restore(&mut storage, &mut config, validate).unwrap();

        assert_eq!(config, saved);
    }

    #[test]
    fn failing_storage_keeps_defaults_and_reports() {
        let mut storage = MemoryStorage::new(32);
        storage.set_failing(true);
        let mut supervisor = Supervisor::new(ModuleId(3), 0, 4);
        let mut config = defaults();

        let result = supervisor.restore(&mut storage, &mut config, validate);

        assert_eq!(result, Err(HiveError::StorageUnavailable { offset: 4 }));
        assert_eq!(config, defaults());
    }

    #[test]
    fn failed_save_is_retried_once_storage_returns() {
        let mut storage = MemoryStorage::new(32);
        let mut supervisor = Supervisor::new(ModuleId(3), 0, 4);
        let changed = Sample {
            mode: 1,
            level: 4.0,
        };

        storage.set_failing(true);
        assert!(supervisor.persist(&mut storage, &changed).is_err());
        assert!(supervisor.is_unsaved());

        supervisor.retry_unsaved(&mut storage, &changed);
        assert!(supervisor.is_unsaved());

        storage.set_failing(false);
        supervisor.retry_unsaved(&mut storage, &changed);
        assert!(!supervisor.is_unsaved());
        assert_eq!(&storage.bytes()[4..9], changed.to_bytes().unwrap().as_slice());
    }

    #[test]
    fn exposure_seeds_identity_then_waits_for_changes() {
        let mut supervisor = Supervisor::new(ModuleId(2), 7, 4);
        let mut record = SettingsRecord::new();

        assert!(supervisor.begin_exposure(&mut record, "PirSwitch"));
        assert_eq!(record.module_type(), Some("PirSwitch"));
        assert_eq!(record.require_int(FIELD_ZONE_ID), Ok(7));
        assert!(!supervisor.begin_exposure(&mut record, "PirSwitch"));

        let mut queue = NotificationQueue::default();
        supervisor.notify(&mut queue);
        assert_eq!(queue.pending(), &[ModuleId(2)]);
        assert!(supervisor.begin_exposure(&mut record, "PirSwitch"));
    }
}
