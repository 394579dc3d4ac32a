//! studysync - Incremental Canvas sync with weekly study bundles
//!
//! Mirrors Canvas course content into a local folder tree and groups it
//! into ISO-week bundles for downstream consumers.
//!
//! # Architecture
//!
//! Each run is a sequential batch:
//! - Every course keeps a registry of all items ever seen; items are never
//!   deleted
//! - Fetched items are classified as new, updated or unchanged and only the
//!   changed ones are written to disk
//! - A manifest per course feeds the weekly bundler, which writes one
//!   `week.json` per released week plus task documents
//!
//! # Modules
//!
//! - `adapters`: External systems (Canvas REST, local materializer)
//! - `core`: Registry, change detection, manifests, bundling, sync engine
//! - `consumer`: Read-only consumers of emitted weeks (briefings)
//! - `domain`: Data structures (Item, Week, SyncEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Sync everything and rebuild the weekly bundles
//! studysync sync --bundle
//!
//! # Rebuild bundles only, as of a given date
//! studysync sync --bundle-only --today 2026-01-21
//!
//! # Write a briefing for the current week
//! studysync briefing --week latest
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{SyncEngine, SyncOptions, SyncReport, WeeklyBundler};
pub use domain::{CourseRef, Item, ItemKind, Week, WeekKey};
