use crate::policy::{RotationPolicy, When};
use chrono::{DateTime, Datelike, Duration, Local, LocalResult, NaiveDateTime, TimeZone};
use std::fmt;

/// Absolute instant before which no time-based rollover happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    At(DateTime<Local>),
    /// No time trigger: the time check never fires.
    Never,
}

impl Deadline {
    pub fn is_due(&self, now: &DateTime<Local>) -> bool {
        match self {
            Deadline::At(at) => now >= at,
            Deadline::Never => false,
        }
    }

    pub fn for_policy(policy: &RotationPolicy, reference: &DateTime<Local>) -> Self {
        next_deadline(policy, reference).map_or(Deadline::Never, Deadline::At)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::At(at) => write!(f, "{}", at.to_rfc3339()),
            Deadline::Never => f.write_str("never"),
        }
    }
}

/*
    @@@
    @next_deadline();
    . Periodic triggers: reference + interval * unit.
    . Everyday: the next anchor time strictly after reference (tomorrow's if today's has passed).
    . Weekday triggers: the next such weekday at the anchor; same weekday with the anchor passed means 7 days out.
    . None when the policy has no time trigger, or when the deadline falls past the representable range.
*/
pub fn next_deadline<Tz: TimeZone>(policy: &RotationPolicy, reference: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let when = policy.when()?;

    if let Some(unit) = when.unit_seconds() {
        let step = periodic_step(unit, policy.interval())?;
        return reference.clone().checked_add_signed(step);
    }

    let tz = reference.timezone();
    let local_now = reference.naive_local();
    let anchor = policy.anchor().to_naive();
    let today = local_now.date();
    let today_target = today.and_time(anchor);

    let days_ahead = match when.weekday() {
        None => i64::from(today_target <= local_now),
        Some(weekday) => {
            let diff = (i64::from(weekday.num_days_from_monday())
                - i64::from(local_now.weekday().num_days_from_monday()))
            .rem_euclid(7);
            if diff == 0 && today_target <= local_now {
                7
            } else {
                diff
            }
        }
    };

    Some(resolve_local(&tz, today_target + Duration::days(days_ahead)))
}

/// Length of one full trigger period, used for the restart staleness check.
pub fn trigger_period(policy: &RotationPolicy) -> Option<Duration> {
    let when = policy.when()?;
    match when.unit_seconds() {
        Some(unit) => periodic_step(unit, policy.interval()),
        None if when == When::Everyday => Some(Duration::days(1)),
        None => Some(Duration::days(7)),
    }
}

fn periodic_step(unit: i64, interval: u32) -> Option<Duration> {
    unit.checked_mul(i64::from(interval)).and_then(Duration::try_seconds)
}

/// True when a file last modified at `modified` has missed at least one
/// full period as of `reference`. Only ever forces a single catch-up
/// rollover; missed boundaries are not replayed.
pub fn is_stale<Tz: TimeZone>(policy: &RotationPolicy, modified: &DateTime<Tz>, reference: &DateTime<Tz>) -> bool {
    match trigger_period(policy).and_then(|period| reference.clone().checked_sub_signed(period)) {
        Some(threshold) => *modified < threshold,
        None => false,
    }
}

// DST gaps push the anchor forward; overlaps take the earlier instant.
pub(crate) fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}
