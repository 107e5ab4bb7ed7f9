use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Mon,
            1 => Self::Tue,
            2 => Self::Wed,
            3 => Self::Thu,
            4 => Self::Fri,
            5 => Self::Sat,
            _ => Self::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

/// Local wall-clock time as seen by schedule-driven modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub day: DayOfWeek,
    pub hour: u8,
    pub minute: u8,
    pub epoch_secs: i64,
}

impl WallClock {
    pub fn new(day: DayOfWeek, hour: u8, minute: u8) -> Self {
        Self {
            day,
            hour,
            minute,
            epoch_secs: 0,
        }
    }

    pub fn from_datetime<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self {
            day: DayOfWeek::from_chrono(now.weekday()),
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            epoch_secs: now.timestamp(),
        }
    }

    pub fn minutes_of_day(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    #[test]
    fn wall_clock_reads_local_fields() {
        let now = FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 9, 30, 0)
            .unwrap();
        let clock = WallClock::from_datetime(&now);

        // Jan 5, 2026 is a Monday.
        assert_eq!(clock.day, DayOfWeek::Mon);
        assert_eq!(clock.minutes_of_day(), 9 * 60 + 30);
        assert_eq!(clock.epoch_secs, now.timestamp());
    }
}
