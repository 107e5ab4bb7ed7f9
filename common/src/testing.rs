//! Test doubles for the hardware and storage collaborators.

use std::collections::HashMap;

use crate::{
    clock::WallClock,
    hardware::{Hardware, PinMode, NO_READING},
    module::ModuleIo,
    notify::NotificationQueue,
    storage::MemoryStorage,
};

#[derive(Debug, Clone, Default)]
pub struct MockHardware {
    levels: HashMap<u8, bool>,
    modes: HashMap<u8, PinMode>,
    temperatures: HashMap<u8, f32>,
    humidities: HashMap<u8, f32>,
}

impl MockHardware {
    pub fn level(&self, pin: u8) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn set_level(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    pub fn set_temperature(&mut self, channel: u8, value: f32) {
        self.temperatures.insert(channel, value);
    }

    pub fn set_humidity(&mut self, channel: u8, value: f32) {
        self.humidities.insert(channel, value);
    }
}

impl Hardware for MockHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.modes.insert(pin, mode);
    }

    fn digital_read(&self, pin: u8) -> bool {
        self.level(pin)
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.set_level(pin, high);
    }

    fn read_temperature(&mut self, channel: u8) -> f32 {
        self.temperatures.get(&channel).copied().unwrap_or(NO_READING)
    }

    fn read_humidity(&mut self, channel: u8) -> f32 {
        self.humidities.get(&channel).copied().unwrap_or(NO_READING)
    }
}

/// Owns one set of collaborators and lends them out as a `ModuleIo`.
pub struct Bench {
    pub hardware: MockHardware,
    pub storage: MemoryStorage,
    pub notifier: NotificationQueue,
    pub clock: Option<WallClock>,
}

impl Default for Bench {
    fn default() -> Self {
        Self {
            hardware: MockHardware::default(),
            storage: MemoryStorage::new(1024),
            notifier: NotificationQueue::default(),
            clock: None,
        }
    }
}

impl Bench {
    pub fn io(&mut self, now_ms: u64) -> ModuleIo<'_> {
        ModuleIo {
            now_ms,
            clock: self.clock,
            hardware: &mut self.hardware,
            storage: &mut self.storage,
            notifier: &mut self.notifier,
        }
    }
}
