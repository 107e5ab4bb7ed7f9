pub mod autotune;
pub mod clock;
pub mod codec;
pub mod config;
pub mod drive;
pub mod error;
pub mod hardware;
pub mod module;
pub mod modules;
pub mod notify;
pub mod output;
pub mod pid;
pub mod registry;
pub mod schedule;
pub mod settings;
pub mod storage;
pub mod supervisor;
pub mod threshold;
pub mod timing;
pub mod topics;

#[cfg(test)]
mod testing;

pub use clock::{DayOfWeek, WallClock};
pub use config::{build_registry, default_layout, ModuleSpec, NetworkConfig, NodeConfig, RuntimeConfig};
pub use error::HiveError;
pub use hardware::{Hardware, PinMode, Readings, SensorReading, NO_READING};
pub use module::{Module, ModuleId, ModuleIo, PwmChannel};
pub use notify::{NotificationQueue, Notifier};
pub use output::{OutputCell, PwmWindow};
pub use registry::ModuleRegistry;
pub use settings::{SettingValue, SettingsRecord};
pub use storage::{MemoryStorage, Storage};
pub use topics::*;
