//! Per-course Item Registry (`_sync_state.json`).
//!
//! The registry is the only authoritative sync state. It is read once at the
//! start of a course run and written once at the end, and only when
//! something in it actually changed. Entries are never removed.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CourseRef, Item, ItemKey, ItemKind};

use super::persist;

/// Current registry document version
pub const REGISTRY_VERSION: u32 = 1;

/// Last observed state of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub item: Item,

    /// When this entry last changed
    pub synced_at: DateTime<Utc>,
}

/// Persisted record of every item seen for one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,

    pub course: CourseRef,

    /// Time of the last run that changed this registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,

    /// Entries keyed by `kind:id`
    #[serde(default)]
    entries: BTreeMap<String, RegistryEntry>,

    #[serde(skip)]
    dirty: bool,
}

impl Registry {
    /// Create an empty registry
    pub fn new(course: CourseRef) -> Self {
        Self {
            version: REGISTRY_VERSION,
            course,
            last_changed: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load the registry at `path`.
    ///
    /// A missing, unreadable or foreign-version document yields an empty
    /// registry, which makes the next run a full resync for the course.
    pub async fn load_or_empty(path: &Path, course: &CourseRef) -> Self {
        match persist::load_json::<Registry>(path).await {
            Ok(Some(mut registry)) if registry.version == REGISTRY_VERSION => {
                if registry.course != *course {
                    debug!(course = %course.name, "Course metadata changed");
                    registry.course = course.clone();
                    registry.dirty = true;
                }
                registry
            }
            Ok(Some(registry)) => {
                warn!(
                    path = %path.display(),
                    version = registry.version,
                    "Unsupported registry version, starting from empty"
                );
                Self::new(course.clone())
            }
            Ok(None) => Self::new(course.clone()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt registry, starting from empty");
                Self::new(course.clone())
            }
        }
    }

    pub fn get(&self, key: &ItemKey) -> Option<&Item> {
        self.entries.get(&key.to_string()).map(|entry| &entry.item)
    }

    pub fn entry(&self, key: &ItemKey) -> Option<&RegistryEntry> {
        self.entries.get(&key.to_string())
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.entries.contains_key(&key.to_string())
    }

    /// Record a new or updated observation of an item
    pub fn upsert(&mut self, item: Item, now: DateTime<Utc>) {
        let key = item.key().to_string();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.item.absorb(item);
                entry.synced_at = now;
            }
            None => {
                self.entries.insert(
                    key,
                    RegistryEntry {
                        item,
                        synced_at: now,
                    },
                );
            }
        }
        self.last_changed = Some(now);
        self.dirty = true;
    }

    /// Fold the latest observation of an unchanged item into its entry.
    ///
    /// Returns whether anything differed. `synced_at` is left alone.
    pub fn refresh(&mut self, item: Item) -> bool {
        let Some(entry) = self.entries.get_mut(&item.key().to_string()) else {
            return false;
        };
        let mut merged = entry.item.clone();
        merged.absorb(item);
        if merged == entry.item {
            return false;
        }
        entry.item = merged;
        self.dirty = true;
        true
    }

    /// All known items, ordered by key
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.entries.values().map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_by_kind(&self) -> BTreeMap<ItemKind, usize> {
        let mut counts = BTreeMap::new();
        for item in self.items() {
            *counts.entry(item.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Whether the in-memory registry differs from what was loaded
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomically write the registry if it changed; returns whether it wrote
    pub async fn save_if_changed(&mut self, path: &Path) -> anyhow::Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        persist::save_json(path, self).await?;
        self.dirty = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn course() -> CourseRef {
        CourseRef::new("1", "FDNT 10")
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_load_as_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("_sync_state.json");

        let registry = Registry::load_or_empty(&path, &course()).await;
        assert!(registry.is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        let registry = Registry::load_or_empty(&path, &course()).await;
        assert!(registry.is_empty());
        assert!(!registry.is_dirty());
    }

    #[tokio::test]
    async fn test_save_only_when_changed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("_sync_state.json");

        let mut registry = Registry::new(course());
        assert!(!registry.save_if_changed(&path).await.unwrap());
        assert!(!path.exists());

        registry.upsert(Item::new("7", ItemKind::Page, "Welcome"), Utc::now());
        assert!(registry.save_if_changed(&path).await.unwrap());
        assert!(!registry.save_if_changed(&path).await.unwrap());

        let loaded = Registry::load_or_empty(&path, &course()).await;
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.is_dirty());
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_upsert_keeps_path_and_never_removes() {
        let mut registry = Registry::new(course());
        let now = Utc::now();
        registry.upsert(
            Item::new("1", ItemKind::File, "notes.pdf").with_path("files/notes.pdf"),
            now,
        );
        registry.upsert(Item::new("2", ItemKind::File, "slides.pdf"), now);
        registry.upsert(Item::new("1", ItemKind::File, "notes v2.pdf"), now);

        assert_eq!(registry.len(), 2);
        let key = ItemKey {
            kind: ItemKind::File,
            id: "1".to_string(),
        };
        let item = registry.get(&key).unwrap();
        assert_eq!(item.title, "notes v2.pdf");
        assert_eq!(item.local_relative_path.as_deref(), Some("files/notes.pdf"));
    }

    #[test]
    fn test_refresh_only_dirties_on_difference() {
        let mut registry = Registry::new(course());
        let item = Item::new("1", ItemKind::Assignment, "Essay").with_path("assignments/Essay.txt");
        registry.upsert(item, Utc::now());
        registry.dirty = false;

        assert!(!registry.refresh(Item::new("1", ItemKind::Assignment, "Essay")));
        assert!(!registry.is_dirty());

        let annotated = Item::new("1", ItemKind::Assignment, "Essay").with_extra("module_name", "Week 1");
        assert!(registry.refresh(annotated));
        assert!(registry.is_dirty());

        let key = ItemKey {
            kind: ItemKind::Assignment,
            id: "1".to_string(),
        };
        let stored = registry.get(&key).unwrap();
        assert_eq!(stored.module_name(), Some("Week 1"));
        assert_eq!(stored.stored_path(), Some("assignments/Essay.txt"));
    }

    #[tokio::test]
    async fn test_renamed_course_marks_dirty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("_sync_state.json");

        let mut registry = Registry::new(course());
        registry.upsert(Item::new("1", ItemKind::Quiz, "Quiz 1"), Utc::now());
        registry.save_if_changed(&path).await.unwrap();

        let renamed = CourseRef::new("1", "FDNT 10 (Spring)");
        let loaded = Registry::load_or_empty(&path, &renamed).await;
        assert!(loaded.is_dirty());
        assert_eq!(loaded.course, renamed);
    }
}
