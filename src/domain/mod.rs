//! Domain types for studysync.
//!
//! This module contains the core data structures:
//! - Item: a piece of course content and its identity
//! - Course: course identity shared by all documents
//! - Week: ISO week buckets and bundle entries
//! - Events: run log records

pub mod course;
pub mod events;
pub mod item;
pub mod time;
pub mod week;

// Re-export commonly used types
pub use course::CourseRef;
pub use events::{SyncCounts, SyncEvent, SyncEventType};
pub use item::{Item, ItemError, ItemKey, ItemKind, Link};
pub use time::{parse_timestamp, TimeBasis, Timestamp};
pub use week::{
    AllItems, IndexEntry, MaterialRef, MaterialSource, PriorityHint, ResourceEntry,
    TaskBundleEntry, TaskKind, Unscheduled, UnscheduledEntry, UnscheduledReason, Week, WeekIndex,
    WeekKey, WeekSpan,
};
