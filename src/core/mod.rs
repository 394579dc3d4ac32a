//! Core sync and bundling logic.
//!
//! This module contains:
//! - Registry: per-course record of every item seen
//! - Detector: new / updated / unchanged classification
//! - Manifest: per-course snapshot consumed by the bundler
//! - Bundler: ISO-week bucketing of every manifest
//! - Emit: writing the weekly bundle tree
//! - Sync: the engine tying them together

pub mod bundler;
pub mod detector;
pub mod emit;
pub mod manifest;
pub mod persist;
pub mod registry;
pub mod sync;
pub mod sync_log;

// Re-export commonly used types
pub use bundler::{load_manifests, BundleOutput, WeeklyBundler, ZoomMatcher};
pub use detector::{classify, Change, ChangeSet};
pub use emit::{BundleWriter, EmitSummary};
pub use manifest::{Manifest, ManifestBuilder};
pub use registry::{Registry, RegistryEntry};
pub use sync::{bundle_only, write_bundles, LockError, SyncEngine, SyncLock, SyncOptions, SyncReport};
pub use sync_log::SyncLog;
