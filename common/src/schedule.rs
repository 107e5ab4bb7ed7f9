//! Weekly heating schedule: seven days of three intervals each.

use serde::{Deserialize, Serialize};

use crate::{
    clock::{DayOfWeek, WallClock},
    codec::{RecordReader, RecordWriter},
    error::HiveError,
};

pub const SLOTS_PER_DAY: usize = 3;
pub const DAYS_PER_WEEK: usize = 7;

/// Bytes taken by one table in a persisted record.
pub const SCHEDULE_STORAGE_SIZE: usize = DAYS_PER_WEEK * SLOTS_PER_DAY * (2 + 2 + 4);

/// Time of day packed as `hour << 8 | minute`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedTime(u16);

impl PackedTime {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self(((hour as u16) << 8) | minute as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn minutes_of_day(self) -> u32 {
        u32::from(self.hour()) * 60 + u32::from(self.minute())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub start: PackedTime,
    pub end: PackedTime,
    #[serde(rename = "t")]
    pub setpoint: f32,
}

impl ScheduleSlot {
    pub fn new(start: PackedTime, end: PackedTime, setpoint: f32) -> Self {
        Self {
            start,
            end,
            setpoint,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.start.raw() == 0 && self.end.raw() == 0
    }

    pub fn validate(&self, t_min: f32, t_max: f32) -> Result<(), HiveError> {
        if self.is_unused() {
            return Ok(());
        }

        if self.start.hour() > 23 || self.end.hour() > 23 {
            return Err(HiveError::invalid("schedule hour above 23"));
        }
        if self.start.minute() > 59 || self.end.minute() > 59 {
            return Err(HiveError::invalid("schedule minute above 59"));
        }
        if self.start.hour() >= self.end.hour() {
            return Err(HiveError::invalid("schedule end must be after start"));
        }
        if self.end.minutes_of_day() - self.start.minutes_of_day() < 60 {
            return Err(HiveError::invalid("schedule interval shorter than an hour"));
        }
        if !self.setpoint.is_finite() || !(t_min..=t_max).contains(&self.setpoint) {
            return Err(HiveError::invalid("schedule setpoint out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleTable {
    days: [[ScheduleSlot; SLOTS_PER_DAY]; DAYS_PER_WEEK],
}

impl ScheduleTable {
    pub fn slot(&self, day: DayOfWeek, index: usize) -> Option<&ScheduleSlot> {
        self.days[day.index()].get(index)
    }

    pub fn set_slot(&mut self, day: DayOfWeek, index: usize, slot: ScheduleSlot) -> bool {
        match self.days[day.index()].get_mut(index) {
            Some(existing) => {
                *existing = slot;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().flatten().all(ScheduleSlot::is_unused)
    }

    pub fn validate(&self, t_min: f32, t_max: f32) -> Result<(), HiveError> {
        self.days
            .iter()
            .flatten()
            .try_for_each(|slot| slot.validate(t_min, t_max))
    }

    /// First slot of the current day that is active now, or will be once
    /// `lookahead_ms` has passed. The lookahead lets a slow process start
    /// early enough to reach the slot setpoint by its start time.
    pub fn active_slot(&self, now: &WallClock, lookahead_ms: u64) -> Option<&ScheduleSlot> {
        let current = u64::from(now.minutes_of_day());
        let predicted = current + lookahead_ms / 60_000;

        self.days[now.day.index()].iter().find(|slot| {
            !slot.is_unused()
                && predicted >= u64::from(slot.start.minutes_of_day())
                && current <= u64::from(slot.end.minutes_of_day())
        })
    }

    pub fn is_active(&self, now: &WallClock, lookahead_ms: u64) -> bool {
        self.active_slot(now, lookahead_ms).is_some()
    }

    pub fn encode(&self, writer: &mut RecordWriter) -> Result<(), HiveError> {
        for slot in self.days.iter().flatten() {
            writer.put_u16(slot.start.raw())?;
            writer.put_u16(slot.end.raw())?;
            writer.put_f32(slot.setpoint)?;
        }
        Ok(())
    }

    pub fn decode(reader: &mut RecordReader<'_>) -> Result<Self, HiveError> {
        let mut table = Self::default();
        for slot in table.days.iter_mut().flatten() {
            slot.start = PackedTime::from_raw(reader.get_u16()?);
            slot.end = PackedTime::from_raw(reader.get_u16()?);
            slot.setpoint = reader.get_f32()?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monday_morning() -> ScheduleTable {
        let mut table = ScheduleTable::default();
        table.set_slot(
            DayOfWeek::Mon,
            0,
            ScheduleSlot::new(PackedTime::new(8, 0), PackedTime::new(10, 0), 22.0),
        );
        table
    }

    #[test]
    fn single_monday_slot_is_active_inside_interval_only() {
        let table = monday_morning();

        assert!(table.is_active(&WallClock::new(DayOfWeek::Mon, 9, 0), 0));
        assert!(!table.is_active(&WallClock::new(DayOfWeek::Mon, 11, 0), 0));
        assert!(!table.is_active(&WallClock::new(DayOfWeek::Mon, 7, 59), 0));
        assert!(!table.is_active(&WallClock::new(DayOfWeek::Tue, 9, 0), 0));
    }

    #[test]
    fn lookahead_starts_slot_early() {
        let table = monday_morning();
        let now = WallClock::new(DayOfWeek::Mon, 7, 40);

        assert!(!table.is_active(&now, 10 * 60_000));
        let slot = table.active_slot(&now, 30 * 60_000).unwrap();
        assert_eq!(slot.setpoint, 22.0);
    }

    #[test]
    fn validation_rules() {
        let ok = ScheduleSlot::new(PackedTime::new(6, 30), PackedTime::new(7, 30), 25.0);
        assert!(ok.validate(23.0, 30.0).is_ok());
        assert!(ScheduleSlot::default().validate(23.0, 30.0).is_ok());

        let reversed = ScheduleSlot::new(PackedTime::new(10, 0), PackedTime::new(8, 0), 25.0);
        assert!(reversed.validate(23.0, 30.0).is_err());

        let short = ScheduleSlot::new(PackedTime::new(8, 30), PackedTime::new(9, 15), 25.0);
        assert!(short.validate(23.0, 30.0).is_err());

        let late = ScheduleSlot::new(PackedTime::new(22, 0), PackedTime::new(24, 0), 25.0);
        assert!(late.validate(23.0, 30.0).is_err());

        let minutes = ScheduleSlot::new(PackedTime::new(8, 0), PackedTime::new(10, 60), 25.0);
        assert!(minutes.validate(23.0, 30.0).is_err());

        let too_hot = ScheduleSlot::new(PackedTime::new(8, 0), PackedTime::new(10, 0), 35.0);
        assert!(too_hot.validate(23.0, 30.0).is_err());
    }

    #[test]
    fn table_json_uses_nested_day_arrays() {
        let table = monday_morning();
        let json = serde_json::to_value(&table).unwrap();

        assert_eq!(json.as_array().map(Vec::len), Some(DAYS_PER_WEEK));
        assert_eq!(json[0][0]["start"], 8 << 8);
        assert_eq!(json[0][0]["end"], 10 << 8);
        assert_eq!(json[0][0]["t"], 22.0);

        let back: ScheduleTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, table);
    }
}
