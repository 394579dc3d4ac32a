//! Run log events.
//!
//! Every sync run appends events to an append-only JSONL log so the last
//! run (and which courses it skipped) can be inspected after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Course the event concerns (if any)
    pub course_id: Option<String>,

    /// Type of event
    pub event_type: SyncEventType,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Counters for course and bundle events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<SyncCounts>,

    /// Error message if skipped/failed
    pub error: Option<String>,
}

impl SyncEvent {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, event_type: SyncEventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            course_id: None,
            event_type,
            summary: summary.into(),
            counts: None,
            error: None,
        }
    }

    pub fn for_course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    pub fn with_counts(mut self, counts: SyncCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events recorded during a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    RunStarted,
    CourseSynced,
    CourseSkipped,
    BundleWritten,
    RunCompleted,
}

/// Item counters for one course (or a whole run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl SyncCounts {
    pub fn fetched(&self) -> usize {
        self.new + self.updated + self.unchanged
    }

    pub fn add(&mut self, other: &SyncCounts) {
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.malformed += other.malformed;
        self.failed += other.failed;
    }
}
