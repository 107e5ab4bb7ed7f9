use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    codec::StoredConfig,
    error::HiveError,
    hardware::{DigitalInput, Relay},
    module::{Module, ModuleId},
    modules::{
        ClimateSensor, ClimateSensorConfig, FloorHeater, FloorHeaterConfig, PirSwitch,
        PirSwitchConfig, SensorBounds, SensorKind, SetpointRange, ThresholdSwitch,
        ThresholdSwitchConfig, WallSwitch, WallSwitchConfig,
    },
    registry::ModuleRegistry,
    storage::StorageAllocator,
    threshold::{SwitchType, ThresholdSpec},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub tick_interval_ms: u64,
    pub pwm_drive_interval_ms: u64,
    pub state_publish_interval_ms: u64,
    /// Size of the byte storage file holding module settings.
    pub storage_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "hive-1".to_string(),
            tick_interval_ms: 100,
            pwm_drive_interval_ms: 50,
            state_publish_interval_ms: 60_000,
            storage_size: 4096,
        }
    }
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        let node_id: String = self
            .node_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.node_id = if node_id.is_empty() {
            Self::default().node_id
        } else {
            node_id
        };
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        self.pwm_drive_interval_ms = self.pwm_drive_interval_ms.clamp(10, 1_000);
        self.state_publish_interval_ms = self.state_publish_interval_ms.max(1_000);
        self.storage_size = self.storage_size.max(64);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

/// One module in the node layout. Pins and channels are fixed by wiring;
/// everything a user may change lives in the module's stored settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleSpec {
    ClimateSensor {
        id: u8,
        zone: u8,
        sensor: SensorKind,
        channel: u8,
    },
    ThresholdSwitch {
        id: u8,
        zone: u8,
        sensor_id: u8,
        relay_pin: u8,
        /// Factory thresholds used until the user stores others.
        #[serde(default)]
        t_threshold: Option<f32>,
        #[serde(default)]
        h_threshold: Option<f32>,
        #[serde(default)]
        below_activates: bool,
    },
    WallSwitch {
        id: u8,
        zone: u8,
        switch_pin: u8,
        #[serde(default)]
        switch_pullup: bool,
        light_pin: u8,
        #[serde(default)]
        fallback_pin: Option<u8>,
    },
    PirSwitch {
        id: u8,
        zone: u8,
        pir_pin: u8,
        light_pin: u8,
    },
    FloorHeater {
        id: u8,
        zone: u8,
        sensor_id: u8,
        relay_pin: u8,
        t_min: f32,
        t_max: f32,
    },
}

impl ModuleSpec {
    pub fn id(&self) -> ModuleId {
        let id = match self {
            Self::ClimateSensor { id, .. }
            | Self::ThresholdSwitch { id, .. }
            | Self::WallSwitch { id, .. }
            | Self::PirSwitch { id, .. }
            | Self::FloorHeater { id, .. } => *id,
        };
        ModuleId(id)
    }

    pub fn storage_size(&self) -> usize {
        match self {
            Self::ClimateSensor { .. } => ClimateSensorConfig::STORAGE_SIZE,
            Self::ThresholdSwitch { .. } => ThresholdSwitchConfig::STORAGE_SIZE,
            Self::WallSwitch { .. } => WallSwitchConfig::STORAGE_SIZE,
            Self::PirSwitch { .. } => PirSwitchConfig::STORAGE_SIZE,
            Self::FloorHeater { .. } => FloorHeaterConfig::STORAGE_SIZE,
        }
    }
}

/// Hall light, bathroom fan on a DHT sensor, and a heated floor on a
/// one-wire probe.
pub fn default_layout() -> Vec<ModuleSpec> {
    vec![
        ModuleSpec::WallSwitch {
            id: 1,
            zone: 1,
            switch_pin: 8,
            switch_pullup: true,
            light_pin: 4,
            fallback_pin: None,
        },
        ModuleSpec::PirSwitch {
            id: 2,
            zone: 1,
            pir_pin: 9,
            light_pin: 5,
        },
        ModuleSpec::ClimateSensor {
            id: 3,
            zone: 2,
            sensor: SensorKind::Dht,
            channel: 0,
        },
        ModuleSpec::ThresholdSwitch {
            id: 4,
            zone: 2,
            sensor_id: 3,
            relay_pin: 6,
            t_threshold: None,
            h_threshold: Some(70.0),
            below_activates: false,
        },
        ModuleSpec::ClimateSensor {
            id: 5,
            zone: 2,
            sensor: SensorKind::OneWire,
            channel: 1,
        },
        ModuleSpec::FloorHeater {
            id: 6,
            zone: 2,
            sensor_id: 5,
            relay_pin: 7,
            t_min: 23.0,
            t_max: 30.0,
        },
    ]
}

/// Contents of `runtime.json`. Missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub timezone: String,
    pub http_port: u16,
    pub modules: Vec<ModuleSpec>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
            timezone: "Europe/Kyiv".to_string(),
            http_port: 8080,
            modules: default_layout(),
        }
    }
}

impl RuntimeConfig {
    /// Clamps timings and drops module entries that cannot be built: id 0,
    /// duplicated ids, and switches or heaters pointing at something that is
    /// not a climate sensor.
    pub fn sanitize(&mut self) {
        self.node.sanitize();
        if self.http_port == 0 {
            self.http_port = 8080;
        }

        let mut seen = HashSet::new();
        self.modules.retain(|spec| {
            let id = spec.id();
            let keep = id.0 != 0 && seen.insert(id);
            if !keep {
                warn!(module = %id, "dropping module with invalid or duplicate id");
            }
            keep
        });

        let sensors: Vec<(u8, SensorKind)> = self
            .modules
            .iter()
            .filter_map(|spec| match spec {
                ModuleSpec::ClimateSensor { id, sensor, .. } => Some((*id, *sensor)),
                _ => None,
            })
            .collect();
        self.modules.retain(|spec| match spec {
            ModuleSpec::ThresholdSwitch { id, sensor_id, .. }
            | ModuleSpec::FloorHeater { id, sensor_id, .. } => {
                let known = sensors.iter().any(|(sensor, _)| sensor == sensor_id);
                if !known {
                    warn!(module = id, sensor = sensor_id, "dropping module without a climate sensor");
                }
                known
            }
            _ => true,
        });
    }
}

fn sensor_kind(specs: &[ModuleSpec], sensor_id: u8) -> Result<SensorKind, HiveError> {
    specs
        .iter()
        .find_map(|spec| match spec {
            ModuleSpec::ClimateSensor { id, sensor, .. } if *id == sensor_id => Some(*sensor),
            _ => None,
        })
        .ok_or(HiveError::UnknownModule(sensor_id))
}

/// Builds every module in layout order, giving each the next free storage
/// region.
pub fn build_registry(specs: &[ModuleSpec]) -> Result<ModuleRegistry, HiveError> {
    let mut allocator = StorageAllocator::default();
    let mut registry = ModuleRegistry::new();

    for spec in specs {
        let offset = allocator.allocate(spec.storage_size());
        let module: Box<dyn Module> = match *spec {
            ModuleSpec::ClimateSensor {
                id,
                zone,
                sensor,
                channel,
            } => Box::new(ClimateSensor::new(ModuleId(id), zone, offset, sensor, channel)),
            ModuleSpec::ThresholdSwitch {
                id,
                zone,
                sensor_id,
                relay_pin,
                t_threshold,
                h_threshold,
                below_activates,
            } => {
                let kind = sensor_kind(specs, sensor_id)?;
                let switch_type = if below_activates {
                    SwitchType::BelowActivates
                } else {
                    SwitchType::AboveActivates
                };
                let disabled = ThresholdSpec::disabled().value;
                let defaults = ThresholdSwitchConfig {
                    t_threshold: t_threshold.unwrap_or(disabled),
                    h_threshold: h_threshold.unwrap_or(disabled),
                    switch_type: switch_type.code(),
                    ..ThresholdSwitchConfig::default()
                };
                Box::new(ThresholdSwitch::new(
                    ModuleId(id),
                    zone,
                    offset,
                    ModuleId(sensor_id),
                    SensorBounds {
                        temperature: kind.temperature_bounds(),
                        humidity: kind.humidity_bounds(),
                    },
                    Relay::active_low(relay_pin),
                    defaults,
                ))
            }
            ModuleSpec::WallSwitch {
                id,
                zone,
                switch_pin,
                switch_pullup,
                light_pin,
                fallback_pin,
            } => Box::new(WallSwitch::new(
                ModuleId(id),
                zone,
                offset,
                DigitalInput {
                    pin: switch_pin,
                    pullup: switch_pullup,
                },
                Relay::active_low(light_pin),
                fallback_pin.map(Relay::active_low),
            )),
            ModuleSpec::PirSwitch {
                id,
                zone,
                pir_pin,
                light_pin,
            } => Box::new(PirSwitch::new(
                ModuleId(id),
                zone,
                offset,
                DigitalInput {
                    pin: pir_pin,
                    pullup: false,
                },
                Relay::active_low(light_pin),
            )),
            ModuleSpec::FloorHeater {
                id,
                zone,
                sensor_id,
                relay_pin,
                t_min,
                t_max,
            } => {
                sensor_kind(specs, sensor_id)?;
                if !(t_min.is_finite() && t_max.is_finite() && t_min < t_max) {
                    return Err(HiveError::invalid(format!(
                        "heater {id} range {t_min}..{t_max} is empty"
                    )));
                }
                Box::new(FloorHeater::new(
                    ModuleId(id),
                    zone,
                    offset,
                    ModuleId(sensor_id),
                    Relay::active_high(relay_pin),
                    SetpointRange { t_min, t_max },
                ))
            }
        };
        registry.register(module)?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SETTINGS_OFFSET;

    #[test]
    fn default_layout_builds() {
        let registry = build_registry(&default_layout()).unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.ids(),
            (1..=6).map(ModuleId).collect::<Vec<_>>()
        );
    }

    #[test]
    fn layout_fits_default_storage() {
        let used: usize = default_layout().iter().map(ModuleSpec::storage_size).sum();
        assert!(SETTINGS_OFFSET + used <= NodeConfig::default().storage_size);
    }

    #[test]
    fn module_specs_use_kind_tag() {
        let raw = r#"[
            {"kind":"climate_sensor","id":1,"zone":0,"sensor":"one_wire","channel":2},
            {"kind":"pir_switch","id":2,"zone":0,"pir_pin":3,"light_pin":4}
        ]"#;
        let specs: Vec<ModuleSpec> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            specs[0],
            ModuleSpec::ClimateSensor {
                id: 1,
                zone: 0,
                sensor: SensorKind::OneWire,
                channel: 2,
            }
        );
        assert_eq!(specs[1].id(), ModuleId(2));
    }

    #[test]
    fn partial_runtime_file_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"node":{"node_id":"attic"},"http_port":9090}"#).unwrap();

        assert_eq!(config.node.node_id, "attic");
        assert_eq!(config.node.tick_interval_ms, 100);
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.network.mqtt_port, 1883);
        assert_eq!(config.modules, default_layout());
    }

    #[test]
    fn sanitize_drops_duplicates_and_orphans() {
        let mut config = RuntimeConfig {
            modules: vec![
                ModuleSpec::PirSwitch {
                    id: 1,
                    zone: 0,
                    pir_pin: 3,
                    light_pin: 4,
                },
                ModuleSpec::PirSwitch {
                    id: 1,
                    zone: 0,
                    pir_pin: 5,
                    light_pin: 6,
                },
                ModuleSpec::FloorHeater {
                    id: 2,
                    zone: 0,
                    sensor_id: 1,
                    relay_pin: 7,
                    t_min: 23.0,
                    t_max: 30.0,
                },
            ],
            ..RuntimeConfig::default()
        };
        config.node.tick_interval_ms = 0;
        config.node.node_id = "living room/1".to_string();

        config.sanitize();

        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.node.tick_interval_ms, 10);
        assert_eq!(config.node.node_id, "livingroom1");
    }

    #[test]
    fn empty_heater_range_is_refused() {
        let specs = vec![
            ModuleSpec::ClimateSensor {
                id: 1,
                zone: 0,
                sensor: SensorKind::OneWire,
                channel: 0,
            },
            ModuleSpec::FloorHeater {
                id: 2,
                zone: 0,
                sensor_id: 1,
                relay_pin: 7,
                t_min: 30.0,
                t_max: 23.0,
            },
        ];
        assert!(build_registry(&specs).unwrap_err().is_invalid_settings());
    }
}
