//! Timestamp parsing and local-date conversion.
//!
//! Canvas reports RFC 3339 instants in UTC (`2026-01-26T07:59:00Z`), while
//! hand-entered dates show up as plain dates. Both are normalized here.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"];

/// A parsed timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl Timestamp {
    /// Calendar date of this timestamp in the given time basis
    pub fn local_date(&self, basis: TimeBasis) -> NaiveDate {
        match self {
            Timestamp::Instant(instant) => basis.date_of(*instant),
            Timestamp::Date(date) => *date,
        }
    }

    /// Comparable instant (plain dates are midnight UTC)
    pub fn as_instant(&self) -> DateTime<Utc> {
        match self {
            Timestamp::Instant(instant) => *instant,
            Timestamp::Date(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::default())),
        }
    }
}

/// Parse a raw timestamp; `None` when empty or unrecognized
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("no due date") {
        return None;
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(Timestamp::Instant(instant.with_timezone(&Utc)));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Timestamp::Instant(Utc.from_utc_datetime(&naive)));
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(Timestamp::Date)
}

/// Which clock turns instants into calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBasis {
    /// The machine's local time zone
    Local,
    /// A fixed UTC offset
    Fixed(FixedOffset),
}

impl TimeBasis {
    /// Build from a configured offset in minutes; `None` or an out-of-range
    /// offset means local time
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        match minutes
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
        {
            Some(offset) => TimeBasis::Fixed(offset),
            None => TimeBasis::Local,
        }
    }

    pub fn utc() -> Self {
        TimeBasis::Fixed(Utc.fix())
    }

    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            TimeBasis::Local => instant.with_timezone(&Local).date_naive(),
            TimeBasis::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }
}
