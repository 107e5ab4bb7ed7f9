//! Concrete module kinds.

pub mod climate_sensor;
pub mod floor_heater;
pub mod pir_switch;
pub mod threshold_switch;
pub mod wall_switch;

pub use climate_sensor::{ClimateSensor, ClimateSensorConfig, SensorKind};
pub use floor_heater::{FloorHeater, FloorHeaterConfig, HeaterMode, SetpointRange};
pub use pir_switch::{PirSwitch, PirSwitchConfig};
pub use threshold_switch::{SensorBounds, ThresholdSwitch, ThresholdSwitchConfig};
pub use wall_switch::{WallSwitch, WallSwitchConfig};
