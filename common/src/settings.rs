//! Settings exchange records.
//!
//! A record is an ordered list of named, typed fields. Fields are appended on
//! first exposure and then updated in place, so an observer can rely on the
//! field order and identity staying fixed for the lifetime of a module.

use std::{fmt, ops::RangeInclusive};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{error::HiveError, schedule::ScheduleTable};

pub const FIELD_MODULE_TYPE: &str = "moduleType";
pub const FIELD_MODULE_STATE: &str = "moduleState";
pub const FIELD_ZONE_ID: &str = "zoneId";
pub const FIELD_DRIVE_MODE: &str = "driveMode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Schedule(ScheduleTable),
}

impl SettingValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_schedule(&self) -> Option<&ScheduleTable> {
        match self {
            Self::Schedule(table) => Some(table),
            _ => None,
        }
    }
}

macro_rules! int_setting {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SettingValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

int_setting!(i8, u8, u16, i32, u32, i64);

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for SettingValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<ScheduleTable> for SettingValue {
    fn from(value: ScheduleTable) -> Self {
        Self::Schedule(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsRecord {
    fields: Vec<(String, SettingValue)>,
}

impl SettingsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the field in place when present, appends it otherwise.
    pub fn put(&mut self, name: &str, value: impl Into<SettingValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<SettingValue>) -> Self {
        self.put(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, name: &str) -> Option<SettingValue> {
        let index = self.fields.iter().position(|(key, _)| key == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn module_type(&self) -> Option<&str> {
        self.get(FIELD_MODULE_TYPE).and_then(SettingValue::as_str)
    }

    pub fn require_module_type(&self, expected: &'static str) -> Result<(), HiveError> {
        match self.module_type() {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(HiveError::WrongModuleType {
                expected,
                found: found.to_string(),
            }),
            None => Err(HiveError::MissingField(FIELD_MODULE_TYPE)),
        }
    }

    /// Rejects any field the module does not know about.
    pub fn ensure_known(&self, known: &[&str]) -> Result<(), HiveError> {
        match self.fields.iter().find(|(key, _)| !known.contains(&key.as_str())) {
            Some((key, _)) => Err(HiveError::UnknownField(key.clone())),
            None => Ok(()),
        }
    }

    fn require(&self, name: &'static str) -> Result<&SettingValue, HiveError> {
        self.get(name).ok_or(HiveError::MissingField(name))
    }

    pub fn require_int(&self, name: &'static str) -> Result<i64, HiveError> {
        self.require(name)?
            .as_i64()
            .ok_or(HiveError::FieldType(name))
    }

    pub fn require_int_in(
        &self,
        name: &'static str,
        range: RangeInclusive<i64>,
    ) -> Result<i64, HiveError> {
        let value = self.require_int(name)?;
        if !range.contains(&value) {
            return Err(HiveError::invalid(format!(
                "{name} {value} is outside {}..={}",
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }

    /// A 0/1 flag, accepted as either a number or a boolean.
    pub fn require_flag(&self, name: &'static str) -> Result<bool, HiveError> {
        Ok(self.require_int_in(name, 0..=1)? == 1)
    }

    pub fn require_float(&self, name: &'static str) -> Result<f64, HiveError> {
        self.require(name)?
            .as_f64()
            .ok_or(HiveError::FieldType(name))
    }

    pub fn require_bool(&self, name: &'static str) -> Result<bool, HiveError> {
        self.require(name)?
            .as_bool()
            .ok_or(HiveError::FieldType(name))
    }

    /// A flag that may be left out of the request.
    pub fn optional_bool(&self, name: &'static str) -> Result<Option<bool>, HiveError> {
        self.get(name)
            .map(|value| value.as_bool().ok_or(HiveError::FieldType(name)))
            .transpose()
    }

    pub fn require_schedule(&self, name: &'static str) -> Result<ScheduleTable, HiveError> {
        self.require(name)?
            .as_schedule()
            .cloned()
            .ok_or(HiveError::FieldType(name))
    }
}

impl Serialize for SettingsRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SettingsRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = SettingsRecord;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a settings object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut record = SettingsRecord::new();
                while let Some((key, value)) = access.next_entry::<String, SettingValue>()? {
                    record.put(&key, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_keeps_field_identity() {
        let mut record = SettingsRecord::new();
        record.put("moduleType", "ThresholdSwitch");
        record.put("driveMode", 0);
        record.put("tThreshold", 25.0f32);

        record.put("driveMode", 2);

        let names: Vec<&str> = record.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["moduleType", "driveMode", "tThreshold"]);
        assert_eq!(record.require_int("driveMode"), Ok(2));
    }

    #[test]
    fn json_preserves_field_order_and_types() {
        let raw = r#"{"moduleType":"PirSwitch","moduleState":true,"driveMode":1,"pirDelay":30}"#;
        let record: SettingsRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(record.module_type(), Some("PirSwitch"));
        assert_eq!(record.require_int("moduleState"), Ok(1));
        assert_eq!(record.require_float("pirDelay"), Ok(30.0));
        assert_eq!(serde_json::to_string(&record).unwrap(), raw);
    }

    #[test]
    fn missing_and_unknown_fields_are_rejected() {
        let record = SettingsRecord::new()
            .with("moduleType", "WallSwitch")
            .with("bogus", 1);

        assert_eq!(
            record.require_int("driveMode"),
            Err(HiveError::MissingField("driveMode"))
        );
        assert_eq!(
            record.ensure_known(&["moduleType", "driveMode"]),
            Err(HiveError::UnknownField("bogus".to_string()))
        );
        assert!(matches!(
            record.require_module_type("PirSwitch"),
            Err(HiveError::WrongModuleType { .. })
        ));
    }

    #[test]
    fn bounded_ints_are_range_checked() {
        let record = SettingsRecord::new()
            .with("driveMode", 5)
            .with("moduleState", true);

        assert!(record
            .require_int_in("driveMode", 0..=2)
            .unwrap_err()
            .is_invalid_settings());
        assert_eq!(record.require_flag("moduleState"), Ok(true));
    }

    #[test]
    fn strings_do_not_coerce_to_numbers() {
        let record = SettingsRecord::new().with("setpoint", "hot");
        assert_eq!(
            record.require_float("setpoint"),
            Err(HiveError::FieldType("setpoint"))
        );
    }
}
