//! Time utilities for parkwatch
//!
//! All policy decisions are made against wall-clock local time: schedules,
//! the state-vehicle night window and ban periods are all expressed in the
//! facility's local time.
//!
//! Debug builds honour [`MOCK_TIME_ENV_VAR`] so the 09:01 rule and the
//! night window can be exercised by hand without waiting for them.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Weekday,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Shifts the clock in debug builds, e.g. `PARKWATCH_MOCK_TIME="2026-03-02 09:01:00"`
pub const MOCK_TIME_ENV_VAR: &str = "PARKWATCH_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How far the mock clock runs ahead of (or behind) the real one. Read once;
/// the mock clock keeps ticking from the configured instant.
static CLOCK_SHIFT: OnceLock<Option<ChronoDuration>> = OnceLock::new();

fn clock_shift() -> Option<ChronoDuration> {
    *CLOCK_SHIFT.get_or_init(|| {
        if !cfg!(debug_assertions) {
            return None;
        }
        let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        match parse_mock_time(&raw) {
            Some(mock) => {
                let shift = mock - Local::now();
                tracing::info!(
                    mock_time = %raw,
                    shift_secs = shift.num_seconds(),
                    "Mock clock enabled"
                );
                Some(shift)
            }
            None => {
                tracing::warn!(
                    mock_time = %raw,
                    format = MOCK_TIME_FORMAT,
                    "Ignoring unusable mock time"
                );
                None
            }
        }
    })
}

fn parse_mock_time(raw: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), MOCK_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Current local time, shifted by `PARKWATCH_MOCK_TIME` in debug builds
pub fn now() -> DateTime<Local> {
    let real = Local::now();
    clock_shift().map_or(real, |shift| real + shift)
}

/// Resolve a local date and time to an instant. Inside a DST gap the
/// earliest valid interpretation is used; `None` only if none exists.
pub fn local_datetime(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&date.and_time(time)).earliest()
}

/// Wall-clock time of day, minute resolution. Orders by hour, then minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0).unwrap_or(NaiveTime::MIN)
    }

    /// Seconds are dropped
    pub fn of_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn of(dt: &DateTime<Local>) -> Self {
        Self::of_time(dt.time())
    }
}

impl std::fmt::Display for WallClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Set of weekdays, bit 0 = Monday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0b001_1111);
    pub const WEEKENDS: DaysOfWeek = DaysOfWeek(0b110_0000);
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(0b111_1111);

    pub fn new(mask: u8) -> Self {
        Self(mask & Self::ALL_DAYS.0)
    }

    pub fn with(self, weekday: Weekday) -> Self {
        Self(self.0 | Self::bit(weekday))
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.0 & Self::bit(weekday) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    fn bit(weekday: Weekday) -> u8 {
        1 << weekday.num_days_from_monday()
    }
}

/// A recurring daily window. `days` selects the days on which the window
/// *starts*; a window whose end is not after its start runs past midnight
/// into the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: DaysOfWeek,
    pub start: WallClock,
    pub end: WallClock,
}

/// One concrete occurrence of a [`TimeWindow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOccurrence {
    /// Calendar date the occurrence started on; the deduplication key for
    /// windows that span midnight.
    pub window_date: NaiveDate,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl TimeWindow {
    pub fn new(days: DaysOfWeek, start: WallClock, end: WallClock) -> Self {
        Self { days, start, end }
    }

    /// Whether the window runs past midnight (e.g. 20:00 - 08:00)
    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// The occurrence containing `dt`, if any. Start is inclusive, end
    /// exclusive.
    pub fn occurrence_at(&self, dt: &DateTime<Local>) -> Option<WindowOccurrence> {
        let today = dt.date_naive();
        let time = WallClock::of(dt);

        let start_date = if !self.crosses_midnight() {
            if time >= self.start && time < self.end {
                today
            } else {
                return None;
            }
        } else if time >= self.start {
            today
        } else if time < self.end {
            today.pred_opt()?
        } else {
            return None;
        };

        if !self.days.contains(start_date.weekday()) {
            return None;
        }

        self.occurrence_starting_on(start_date)
    }

    /// The occurrence that starts on `date`, regardless of the day mask
    pub fn occurrence_starting_on(&self, date: NaiveDate) -> Option<WindowOccurrence> {
        let end_date = if self.crosses_midnight() {
            date.succ_opt()?
        } else {
            date
        };

        Some(WindowOccurrence {
            window_date: date,
            start: local_datetime(date, self.start.to_naive_time())?,
            end: local_datetime(end_date, self.end.to_naive_time())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn night() -> TimeWindow {
        TimeWindow::new(
            DaysOfWeek::ALL_DAYS,
            WallClock::new(20, 0).unwrap(),
            WallClock::new(8, 0).unwrap(),
        )
    }

    #[test]
    fn wall_clock_bounds_and_order() {
        assert!(WallClock::new(24, 0).is_none());
        assert!(WallClock::new(9, 60).is_none());

        let start = WallClock::new(9, 0).unwrap();
        let grace_end = WallClock::new(9, 1).unwrap();
        assert!(start < grace_end);
        assert!(WallClock::new(8, 59).unwrap() < start);
        assert_eq!(WallClock::of(&at(2026, 3, 2, 20, 5)).to_string(), "20:05");
    }

    #[test]
    fn mock_time_parsing() {
        assert_eq!(parse_mock_time("2026-03-02 09:01:00"), Some(at(2026, 3, 2, 9, 1)));
        assert_eq!(parse_mock_time(" 2026-03-02 09:01:00\n"), Some(at(2026, 3, 2, 9, 1)));
        assert_eq!(parse_mock_time("2026-03-02T09:01:00"), None);
    }

    #[test]
    fn day_masks() {
        assert!(DaysOfWeek::WEEKDAYS.contains(Weekday::Mon));
        assert!(!DaysOfWeek::WEEKDAYS.contains(Weekday::Sat));
        assert!(DaysOfWeek::WEEKENDS.contains(Weekday::Sun));

        let mwf = DaysOfWeek::default()
            .with(Weekday::Mon)
            .with(Weekday::Wed)
            .with(Weekday::Fri);
        assert_eq!(mwf.bits(), 0b1_0101);
        assert!(!mwf.contains(Weekday::Tue));
        assert!(DaysOfWeek::new(0).is_empty());
    }

    #[test]
    fn office_hours_exclude_end_and_weekend() {
        let window = TimeWindow::new(
            DaysOfWeek::WEEKDAYS,
            WallClock::new(9, 0).unwrap(),
            WallClock::new(17, 0).unwrap(),
        );

        // 2026-03-02 is a Monday
        let occ = window.occurrence_at(&at(2026, 3, 2, 9, 0)).unwrap();
        assert_eq!(occ.start, at(2026, 3, 2, 9, 0));
        assert_eq!(occ.end, at(2026, 3, 2, 17, 0));
        assert!(window.occurrence_at(&at(2026, 3, 2, 16, 59)).is_some());
        assert!(window.occurrence_at(&at(2026, 3, 2, 17, 0)).is_none());
        assert!(window.occurrence_at(&at(2026, 3, 2, 8, 59)).is_none());
        assert!(window.occurrence_at(&at(2026, 3, 7, 10, 0)).is_none());
    }

    #[test]
    fn night_window_is_anchored_to_start_date() {
        let window = night();

        let evening = window.occurrence_at(&at(2026, 3, 2, 23, 0)).unwrap();
        assert_eq!(evening.window_date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        let small_hours = window.occurrence_at(&at(2026, 3, 3, 2, 0)).unwrap();
        assert_eq!(small_hours.window_date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(small_hours.end, at(2026, 3, 3, 8, 0));

        assert!(window.occurrence_at(&at(2026, 3, 3, 11, 0)).is_none());
        assert!(window.occurrence_at(&at(2026, 3, 3, 8, 0)).is_none());
    }

    #[test]
    fn day_mask_applies_to_the_start_day() {
        // Starts Friday night only
        let window = TimeWindow::new(
            DaysOfWeek::default().with(Weekday::Fri),
            WallClock::new(22, 0).unwrap(),
            WallClock::new(6, 0).unwrap(),
        );

        // Saturday 03:00 belongs to Friday's occurrence
        let occ = window.occurrence_at(&at(2026, 3, 7, 3, 0)).unwrap();
        assert_eq!(occ.window_date, NaiveDate::from_ymd_opt(2026, 3, 6).unwrap());

        // Saturday 23:00 would start a Saturday occurrence: not selected
        assert!(window.occurrence_at(&at(2026, 3, 7, 23, 0)).is_none());
    }
}
