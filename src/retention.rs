use crate::error::Error;
use crate::policy::{ExpirationRule, ExpirationScale};
use crate::scheduler::resolve_local;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of one sweep. Failures never stop the sweep.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub removed: Vec<PathBuf>,
    /// One `Error::RetentionIo` per file that could not be examined or removed.
    pub failures: Vec<Error>,
}

/// Deletes backups of one active file once they are older than the rule allows.
///
/// Candidates are the regular files in the active file's directory whose
/// name starts with the active file's name, minus the active file itself and
/// its `.lock` sibling.
#[derive(Debug, Clone)]
pub struct RetentionEnforcer {
    active: PathBuf,
    rule: ExpirationRule,
}

impl RetentionEnforcer {
    pub fn new(active: impl Into<PathBuf>, rule: ExpirationRule) -> Self {
        RetentionEnforcer { active: active.into(), rule }
    }

    pub fn rule(&self) -> &ExpirationRule {
        &self.rule
    }

    /// Files last modified strictly before this instant are expired.
    /// `None` when the interval reaches past the representable range.
    pub fn cutoff<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        cutoff(&self.rule, now)
    }

    pub fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let dir = match self.active.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let Some(prefix) = self.active.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(Vec::new());
        };
        let lock_name = format!("{prefix}.lock");

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || name == prefix || name == lock_name {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /*
        @@@
        @enforce();
        . Computes the cutoff from `now` and lists every backup sharing the active file's prefix.
        . Removes each one whose mtime is older than the cutoff; files that vanished meanwhile are not failures.
        . Records every other failure per file and keeps going.
    */
    pub fn enforce(&self, now: &DateTime<Local>) -> RetentionReport {
        let mut report = RetentionReport::default();
        let Some(cutoff) = self.cutoff(now) else {
            return report;
        };

        let candidates = match self.candidates() {
            Ok(c) => c,
            Err(source) => {
                let path = self.active.parent().map(Path::to_path_buf).unwrap_or_default();
                report.failures.push(Error::RetentionIo { path, source });
                return report;
            }
        };

        self.sweep(candidates, &cutoff, &mut report);
        report
    }

    fn sweep(&self, candidates: Vec<PathBuf>, cutoff: &DateTime<Local>, report: &mut RetentionReport) {
        for path in candidates {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => DateTime::<Local>::from(t),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    report.failures.push(Error::RetentionIo { path, source });
                    continue;
                }
            };
            if modified >= *cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => report.failures.push(Error::RetentionIo { path, source }),
            }
        }
    }
}

pub fn cutoff<Tz: TimeZone>(rule: &ExpirationRule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let n = i64::try_from(rule.interval()).unwrap_or(i64::MAX);
    let span = match rule.scale() {
        ExpirationScale::Seconds => Duration::try_seconds(n),
        ExpirationScale::Minutes => Duration::try_minutes(n),
        ExpirationScale::Hours => Duration::try_hours(n),
        ExpirationScale::Days => Duration::try_days(n),
        ExpirationScale::CalendarDay => {
            let midnight = now.naive_local().date().and_time(NaiveTime::MIN);
            return Some(resolve_local(&now.timezone(), midnight));
        }
    };
    span.and_then(|s| now.clone().checked_sub_signed(s))
}
