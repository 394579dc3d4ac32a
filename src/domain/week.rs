//! ISO calendar weeks and the documents emitted per week.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::course::CourseRef;
use super::item::ItemKind;

/// ISO year-week key, rendered as `2026-W05`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekKey {
    pub year: i32,
    pub week: u32,
}

impl WeekKey {
    pub fn of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }
}

impl std::fmt::Display for WeekKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-W{:02}", self.year, self.week)
    }
}

impl std::str::FromStr for WeekKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (year, week) = s
            .trim()
            .split_once("-W")
            .ok_or_else(|| anyhow::anyhow!("Invalid week key: {}", s))?;
        let year: i32 = year.parse()?;
        let week: u32 = week.parse()?;
        if !(1..=53).contains(&week) {
            anyhow::bail!("Invalid week number in key: {}", s);
        }
        Ok(Self { year, week })
    }
}

impl TryFrom<String> for WeekKey {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<WeekKey> for String {
    fn from(key: WeekKey) -> Self {
        key.to_string()
    }
}

/// Half-open interval `[monday, next monday)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeekSpan {
    pub key: WeekKey,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl WeekSpan {
    /// The week containing `date`
    pub fn containing(date: NaiveDate) -> Self {
        let start_date = date - Duration::days(date.weekday().num_days_from_monday() as i64);
        Self {
            key: WeekKey::of(date),
            start_date,
            end_date: start_date + Duration::days(7),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date < self.end_date
    }

    /// Weeks that have started are emitted; future weeks are only indexed
    pub fn is_released(&self, today: NaiveDate) -> bool {
        self.start_date <= today
    }

    /// Folder name under the weekly directory: `2026-W04_2026-01-19`
    pub fn folder_name(&self) -> String {
        format!("{}_{}", self.key, self.start_date)
    }
}

/// Deterministic urgency label for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityHint {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for PriorityHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityHint::High => write!(f, "high"),
            PriorityHint::Medium => write!(f, "medium"),
            PriorityHint::Low => write!(f, "low"),
        }
    }
}

/// Kind of a task bundle entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Assignment,
    Quiz,
    Prep,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Assignment => write!(f, "assignment"),
            TaskKind::Quiz => write!(f, "quiz"),
            TaskKind::Prep => write!(f, "prep"),
        }
    }
}

/// Where a material reference points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialSource {
    /// Linked from the item's own description
    Link,
    /// Lives in the same module folder as the item
    Module,
}

/// A related resource attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRef {
    pub title: String,

    pub source: MaterialSource,

    /// Kind of the resolved course item (absent for external URLs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Path relative to the download root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_relative_path: Option<String>,
}

/// A schedulable item (or its prep reminder) inside a week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBundleEntry {
    pub course: CourseRef,

    pub kind: TaskKind,

    pub id: String,

    pub title: String,

    pub week: WeekKey,

    /// Date that placed this entry in its week
    pub scheduled_date: NaiveDate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,

    /// For prep entries: id of the graded item being prepared for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_for: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_possible: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,

    /// Path relative to the download root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_relative_path: Option<String>,

    #[serde(default)]
    pub materials: Vec<MaterialRef>,

    #[serde(default)]
    pub zoom: Vec<String>,

    pub priority_hint: PriorityHint,

    /// Synthesized task document, relative to the weekly directory
    pub task_bundle_relative_path: String,

    /// Instructions carried into the task document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A dated non-task item inside a week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub course: CourseRef,

    pub kind: ItemKind,

    pub id: String,

    pub title: String,

    pub week: WeekKey,

    pub scheduled_date: NaiveDate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_relative_path: Option<String>,
}

/// Contents of one `week.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Week {
    pub week: WeekSpan,

    pub items: Vec<TaskBundleEntry>,

    pub resources: Vec<ResourceEntry>,
}

/// One row of `_index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: WeekKey,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Folder under the weekly directory
    pub folder: String,
    /// Whether `week.json` was emitted (the week has started)
    pub released: bool,
    pub tasks: usize,
    pub resources: usize,
}

/// Contents of `_index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekIndex {
    /// The date the bundle was computed for
    pub today: NaiveDate,
    pub weeks: Vec<IndexEntry>,
}

impl WeekIndex {
    /// Latest week that has already started
    pub fn latest_released(&self) -> Option<&IndexEntry> {
        self.weeks.iter().filter(|w| w.released).max_by_key(|w| w.key)
    }

    pub fn find(&self, key: WeekKey) -> Option<&IndexEntry> {
        self.weeks.iter().find(|w| w.key == key)
    }
}

/// Contents of `_all_items.json`: every scheduled entry across all weeks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllItems {
    pub tasks: Vec<TaskBundleEntry>,
    pub resources: Vec<ResourceEntry>,
}

/// Why an item could not be placed in a week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledReason {
    NoDate,
    UnparseableDate,
}

/// An item without a usable due or unlock date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscheduledEntry {
    pub course: CourseRef,

    pub kind: ItemKind,

    pub id: String,

    pub title: String,

    pub reason: UnscheduledReason,

    /// The date text that failed to parse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_relative_path: Option<String>,
}

/// Contents of `_unscheduled.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unscheduled {
    pub items: Vec<UnscheduledEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_tuesday_lands_in_monday_week() {
        let span = WeekSpan::containing(date(2026, 1, 20));
        assert_eq!(span.start_date, date(2026, 1, 19));
        assert_eq!(span.end_date, date(2026, 1, 26));
        assert_eq!(span.key.to_string(), "2026-W04");
        assert!(span.contains(date(2026, 1, 25)));
        assert!(!span.contains(date(2026, 1, 26)));
    }

    #[test]
    fn test_iso_year_boundary() {
        // Jan 1 2027 is a Friday, still in ISO week 2026-W53
        let span = WeekSpan::containing(date(2027, 1, 1));
        assert_eq!(span.key.to_string(), "2026-W53");
        assert_eq!(span.start_date, date(2026, 12, 28));
    }

    #[test]
    fn test_week_key_serde() {
        let key: WeekKey = "2026-W05".parse().unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2026-W05\"");
        let back: WeekKey = serde_json::from_str("\"2026-W05\"").unwrap();
        assert_eq!(back, key);
        assert!("2026-W60".parse::<WeekKey>().is_err());
        assert!("2026-05".parse::<WeekKey>().is_err());
    }

    #[test]
    fn test_latest_released_skips_future_weeks() {
        let entry = |d: NaiveDate, released: bool| {
            let span = WeekSpan::containing(d);
            IndexEntry {
                key: span.key,
                start_date: span.start_date,
                end_date: span.end_date,
                folder: span.folder_name(),
                released,
                tasks: 0,
                resources: 0,
            }
        };
        let index = WeekIndex {
            today: date(2026, 1, 21),
            weeks: vec![
                entry(date(2026, 1, 12), true),
                entry(date(2026, 1, 19), true),
                entry(date(2026, 2, 2), false),
            ],
        };
        assert_eq!(index.latest_released().unwrap().key.to_string(), "2026-W04");
        assert!(index.find("2026-W06".parse().unwrap()).is_some());
    }

    #[test]
    fn test_release_and_folder() {
        let span = WeekSpan::containing(date(2026, 2, 2));
        assert!(!span.is_released(date(2026, 1, 10)));
        assert!(span.is_released(date(2026, 2, 2)));
        assert_eq!(span.folder_name(), "2026-W06_2026-02-02");
    }
}
