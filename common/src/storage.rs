use crate::error::HiveError;

/// Written at offset 0 once every module has persisted its defaults.
pub const STORAGE_CHECK_BYTE: u8 = 99;

/// Module regions start after the header bytes.
pub const SETTINGS_OFFSET: usize = 4;

/// Byte-addressed non-volatile storage shared by all modules.
pub trait Storage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HiveError>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HiveError>;
}

pub fn has_saved_settings(storage: &mut dyn Storage) -> bool {
    matches!(storage.read(0, 1).as_deref(), Ok([STORAGE_CHECK_BYTE]))
}

pub fn mark_settings_saved(storage: &mut dyn Storage) -> Result<(), HiveError> {
    storage.write(0, &[STORAGE_CHECK_BYTE])
}

/// Hands out consecutive fixed-size regions in registration order.
#[derive(Debug, Clone)]
pub struct StorageAllocator {
    next: usize,
}

impl Default for StorageAllocator {
    fn default() -> Self {
        Self {
            next: SETTINGS_OFFSET,
        }
    }
}

impl StorageAllocator {
    pub fn allocate(&mut self, size: usize) -> usize {
        let offset = self.next;
        self.next += size;
        offset
    }

    pub fn used(&self) -> usize {
        self.next
    }
}

/// EEPROM-like storage held in memory. Erased bytes read as `0xFF`.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    failing: bool,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xFF; size],
            failing: false,
        }
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HiveError> {
        if self.failing {
            return Err(HiveError::StorageUnavailable { offset });
        }
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(HiveError::StorageUnavailable { offset })?;
        Ok(self.bytes[offset..end].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HiveError> {
        if self.failing {
            return Err(HiveError::StorageUnavailable { offset });
        }
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or(HiveError::StorageUnavailable { offset })?;
        self.bytes[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}
