use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::warn;

use hive_common::{HiveError, Storage};

/// Module settings kept in a flat file that stands in for the board's EEPROM.
///
/// The whole image is held in memory; writes go through to the file at their
/// offset. Bytes past the end of a short file read as erased (`0xFF`).
pub struct FileStorage {
    path: PathBuf,
    file: File,
    image: Vec<u8>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>, size: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open settings storage {}", path.display()))?;

        let mut image = Vec::with_capacity(size);
        file.read_to_end(&mut image)
            .with_context(|| format!("failed to read settings storage {}", path.display()))?;
        let stored = image.len();
        image.resize(size, 0xFF);

        let mut storage = Self { path, file, image };
        if stored < size {
            // Pad on disk too, so later writes never leave zero-filled holes.
            let tail = storage.image[stored..].to_vec();
            storage
                .write_through(stored, &tail)
                .with_context(|| format!("failed to extend {}", storage.path.display()))?;
        }
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_through(&mut self, offset: usize, bytes: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()
    }
}

impl Storage for FileStorage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HiveError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.image.len())
            .ok_or(HiveError::StorageUnavailable { offset })?;
        Ok(self.image[offset..end].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HiveError> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.image.len())
            .ok_or(HiveError::StorageUnavailable { offset })?;
        if let Err(err) = self.write_through(offset, bytes) {
            warn!(path = %self.path.display(), offset, "settings storage write failed: {err}");
            return Err(HiveError::StorageUnavailable { offset });
        }
        self.image[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}
