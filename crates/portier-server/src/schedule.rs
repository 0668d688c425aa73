//! Weekly access windows for allow-listed IPs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowParseError {
    #[error("expected `day@HH:MM-HH:MM`, got {0:?}")]
    Format(String),

    #[error("day must be 0 (Sunday) to 6 (Saturday), got {0:?}")]
    Day(String),

    #[error("invalid time {0:?}")]
    Time(String),

    #[error("window {0:?} ends before it starts")]
    Inverted(String),
}

/// One weekly window. Windows never cross midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWindow {
    /// 0 = Sunday .. 6 = Saturday.
    pub day: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AccessWindow {
    /// Inclusive at both ends, compared to the minute.
    fn contains(&self, day: u8, time: NaiveTime) -> bool {
        let time = time.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(time);
        self.day == day && self.start <= time && time <= self.end
    }
}

impl FromStr for AccessWindow {
    type Err = WindowParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (day, range) = s
            .split_once('@')
            .ok_or_else(|| WindowParseError::Format(s.to_owned()))?;
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| WindowParseError::Format(s.to_owned()))?;

        let day = day
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|d| *d <= 6)
            .ok_or_else(|| WindowParseError::Day(day.to_owned()))?;
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if end < start {
            return Err(WindowParseError::Inverted(s.to_owned()));
        }

        Ok(Self { day, start, end })
    }
}

impl fmt::Display for AccessWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}-{}",
            self.day,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, WindowParseError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| WindowParseError::Time(s.to_owned()))
}

/// Parse a `;`-separated list of windows, skipping empty items.
pub fn parse_windows(s: &str) -> Result<Vec<AccessWindow>, WindowParseError> {
    s.split(';')
        .filter(|item| !item.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Schedule {
    tz: Tz,
    windows: Vec<AccessWindow>,
}

impl Schedule {
    pub fn new(tz: Tz, windows: Vec<AccessWindow>) -> Self {
        Self { tz, windows }
    }

    /// Whether `now` falls inside any window, in the schedule's time zone.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        let day = local.weekday().num_days_from_sunday() as u8;
        let time = local.time();
        self.windows.iter().any(|w| w.contains(day, time))
    }
}
