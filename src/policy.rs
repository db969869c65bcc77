use crate::error::{Error, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Time-based rotation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum When {
    Second,
    Minute,
    Hour,
    Everyday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl When {
    /// Length of one unit for the periodic triggers, `None` for anchored ones.
    pub fn unit_seconds(self) -> Option<i64> {
        match self {
            When::Second => Some(1),
            When::Minute => Some(60),
            When::Hour => Some(3600),
            _ => None,
        }
    }

    /// Target weekday for the weekly triggers.
    pub fn weekday(self) -> Option<Weekday> {
        match self {
            When::Monday => Some(Weekday::Mon),
            When::Tuesday => Some(Weekday::Tue),
            When::Wednesday => Some(Weekday::Wed),
            When::Thursday => Some(Weekday::Thu),
            When::Friday => Some(Weekday::Fri),
            When::Saturday => Some(Weekday::Sat),
            When::Sunday => Some(Weekday::Sun),
            _ => None,
        }
    }
}

/// Time-of-day anchor for daily and weekly rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
    second: u32,
}

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay { hour: 0, minute: 0, second: 0 };

    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(Error::config(
                "anchor_time_of_day",
                format!("{hour:02}:{minute:02}:{second:02} is not a valid time of day"),
            ));
        }
        Ok(TimeOfDay { hour, minute, second })
    }

    pub fn to_naive(self) -> NaiveTime {
        // fields are range-checked in `new`
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Parses `HH:MM` or `HH:MM:SS`.
impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::config("anchor_time_of_day", format!("`{s}` is not HH:MM[:SS]"));
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }
        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        TimeOfDay::new(fields[0], fields[1], fields[2])
    }
}

/// Unit of an age-based expiration rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationScale {
    Seconds,
    Minutes,
    Hours,
    Days,
    /// Everything last modified before today's local midnight expires.
    CalendarDay,
}

/// Age-based deletion of backups, independent of `backup_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpirationRule {
    scale: ExpirationScale,
    interval: u64,
}

impl ExpirationRule {
    /// `interval` is ignored for [`ExpirationScale::CalendarDay`].
    pub fn new(scale: ExpirationScale, interval: i64) -> Result<Self> {
        let interval = u64::try_from(interval)
            .map_err(|_| Error::config("expiration.interval", format!("must be >= 0, got {interval}")))?;
        Ok(ExpirationRule { scale, interval })
    }

    pub fn scale(&self) -> ExpirationScale {
        self.scale
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }
}

/// Suffixes applied to the active filename before any rotation logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FilenameDecorations {
    pub pid: bool,
    pub timestamp: bool,
}

/// Validated description of when to rotate and what to keep.
///
/// Immutable once built; every out-of-range value is rejected by
/// [`RotationPolicyBuilder::build`] rather than clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationPolicy {
    when: Option<When>,
    interval: u32,
    anchor: TimeOfDay,
    max_bytes: u64,
    backup_count: usize,
    expiration: Option<ExpirationRule>,
    decorations: FilenameDecorations,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy {
            when: None,
            interval: 1,
            anchor: TimeOfDay::MIDNIGHT,
            max_bytes: 0,
            backup_count: DEFAULT_BACKUP_COUNT,
            expiration: None,
            decorations: FilenameDecorations::default(),
        }
    }
}

pub const DEFAULT_BACKUP_COUNT: usize = 5;

impl RotationPolicy {
    pub fn builder() -> RotationPolicyBuilder {
        RotationPolicyBuilder::default()
    }

    pub fn when(&self) -> Option<When> {
        self.when
    }

    /// Multiplier for the periodic triggers; always at least 1.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn anchor(&self) -> TimeOfDay {
        self.anchor
    }

    /// Size threshold in bytes, 0 when size rotation is off.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn backup_count(&self) -> usize {
        self.backup_count
    }

    pub fn expiration(&self) -> Option<&ExpirationRule> {
        self.expiration.as_ref()
    }

    pub fn decorations(&self) -> FilenameDecorations {
        self.decorations
    }

    /// False when neither a time nor a size trigger is set: the writer is
    /// then a plain append-only file.
    pub fn rotates(&self) -> bool {
        self.when.is_some() || self.max_bytes > 0
    }

    /// Applies the pid and timestamp suffixes, in that order.
    ///
    /// `logs/app.log` becomes `logs/app.4242.log`, then
    /// `logs/app.4242_20240210_213000.log`.
    pub fn decorate<Tz: TimeZone>(&self, path: &Path, now: &DateTime<Tz>) -> PathBuf
    where
        Tz::Offset: fmt::Display,
    {
        let mut path = path.to_path_buf();
        if self.decorations.pid {
            path = insert_before_extension(&path, &format!(".{}", std::process::id()));
        }
        if self.decorations.timestamp {
            let stamp = now.format("%Y%m%d_%H%M%S");
            path = insert_before_extension(&path, &format!("_{stamp}"));
        }
        path
    }
}

fn insert_before_extension(path: &Path, suffix: &str) -> PathBuf {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return path.to_path_buf();
    };
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name.as_str(), ""),
    };
    path.with_file_name(format!("{stem}{suffix}{ext}"))
}

/// Collects raw (possibly invalid) values and validates them all in `build`.
///
/// Numeric inputs are signed so that negative configuration values reach
/// validation instead of failing in deserialization.
#[derive(Debug, Clone)]
pub struct RotationPolicyBuilder {
    when: Option<When>,
    interval: Option<i64>,
    anchor: TimeOfDay,
    max_bytes: Option<i64>,
    backup_count: i64,
    expiration: Option<ExpirationRule>,
    decorations: FilenameDecorations,
}

impl Default for RotationPolicyBuilder {
    fn default() -> Self {
        RotationPolicyBuilder {
            when: None,
            interval: None,
            anchor: TimeOfDay::MIDNIGHT,
            max_bytes: None,
            backup_count: DEFAULT_BACKUP_COUNT as i64,
            expiration: None,
            decorations: FilenameDecorations::default(),
        }
    }
}

impl RotationPolicyBuilder {
    pub fn when(mut self, when: When) -> Self {
        self.when = Some(when);
        self
    }

    pub fn interval(mut self, interval: i64) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn anchor(mut self, anchor: TimeOfDay) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn max_bytes(mut self, max_bytes: i64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn backup_count(mut self, backup_count: i64) -> Self {
        self.backup_count = backup_count;
        self
    }

    pub fn expiration(mut self, rule: ExpirationRule) -> Self {
        self.expiration = Some(rule);
        self
    }

    pub fn append_pid(mut self, on: bool) -> Self {
        self.decorations.pid = on;
        self
    }

    pub fn append_timestamp(mut self, on: bool) -> Self {
        self.decorations.timestamp = on;
        self
    }

    pub fn build(self) -> Result<RotationPolicy> {
        let interval = match self.interval {
            None => 1,
            Some(i) if i < 0 => {
                return Err(Error::config("interval", format!("must be >= 0, got {i}")));
            }
            Some(i) => u32::try_from(i)
                .map_err(|_| Error::config("interval", format!("{i} is too large")))?
                .max(1),
        };

        let max_bytes = match self.max_bytes {
            None => 0,
            Some(b) => u64::try_from(b)
                .map_err(|_| Error::config("max_bytes", format!("must be >= 0, got {b}")))?,
        };

        let backup_count = usize::try_from(self.backup_count).map_err(|_| {
            Error::config("backup_count", format!("must be >= 0, got {}", self.backup_count))
        })?;

        Ok(RotationPolicy {
            when: self.when,
            interval,
            anchor: self.anchor,
            max_bytes,
            backup_count,
            expiration: self.expiration,
            decorations: self.decorations,
        })
    }
}
