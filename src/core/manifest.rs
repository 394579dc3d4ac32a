//! Per-course manifest (`_manifest.json`).
//!
//! The manifest is derived from the registry and rebuilt after every course
//! run. It carries no wall-clock fields so an unchanged registry produces a
//! byte-identical document.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{parse_timestamp, CourseRef, Item, ItemKind};

use super::persist;

/// Current manifest document version
pub const MANIFEST_VERSION: u32 = 1;

const VIDEO_HOSTS: [&str; 6] = ["youtube.com", "youtu.be", "vimeo.com", "kaltura", "panopto", "zoom.us"];

/// Items grouped by kind, in a fixed kind order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestItems {
    #[serde(default)]
    pub assignments: Vec<Item>,
    #[serde(default)]
    pub quizzes: Vec<Item>,
    #[serde(default)]
    pub pages: Vec<Item>,
    #[serde(default)]
    pub announcements: Vec<Item>,
    #[serde(default)]
    pub files: Vec<Item>,
    #[serde(default)]
    pub discussions: Vec<Item>,
    #[serde(default)]
    pub module_items: Vec<Item>,
}

impl ManifestItems {
    pub fn of_kind(&self, kind: ItemKind) -> &[Item] {
        match kind {
            ItemKind::Assignment => &self.assignments,
            ItemKind::Quiz => &self.quizzes,
            ItemKind::Page => &self.pages,
            ItemKind::Announcement => &self.announcements,
            ItemKind::File => &self.files,
            ItemKind::Discussion => &self.discussions,
            ItemKind::ModuleItem => &self.module_items,
        }
    }

    fn of_kind_mut(&mut self, kind: ItemKind) -> &mut Vec<Item> {
        match kind {
            ItemKind::Assignment => &mut self.assignments,
            ItemKind::Quiz => &mut self.quizzes,
            ItemKind::Page => &mut self.pages,
            ItemKind::Announcement => &mut self.announcements,
            ItemKind::File => &mut self.files,
            ItemKind::Discussion => &mut self.discussions,
            ItemKind::ModuleItem => &mut self.module_items,
        }
    }

    /// Every item in manifest order
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        ItemKind::ALL
            .into_iter()
            .flat_map(move |kind| self.of_kind(kind).iter())
    }
}

/// Count of extracted links by category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub files: usize,
    pub videos: usize,
    pub external: usize,
    pub other: usize,
}

/// Category of a link found in an item body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCategory {
    File,
    Video,
    External,
    Other,
}

impl LinkCategory {
    pub fn of(url: &str, canvas_host: Option<&str>) -> Self {
        let lower = url.to_lowercase();
        if lower.contains("/files/") {
            return LinkCategory::File;
        }
        if VIDEO_HOSTS.iter().any(|host| lower.contains(host)) || lower.contains("/media_objects/") {
            return LinkCategory::Video;
        }
        let is_http = lower.starts_with("http://") || lower.starts_with("https://");
        let on_canvas = match (canvas_host, crate::config::host_of(&lower)) {
            (Some(canvas), Some(host)) => host == canvas,
            _ => false,
        };
        if is_http && !on_canvas {
            LinkCategory::External
        } else {
            LinkCategory::Other
        }
    }
}

/// Typed aggregation of every known item for one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,

    pub course: CourseRef,

    /// Item count per kind
    pub counts: BTreeMap<String, usize>,

    pub links: LinkSummary,

    pub items: ManifestItems,
}

impl Manifest {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        persist::load_json(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        persist::save_json(path, self).await
    }
}

/// Builds manifests from registry items
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    canvas_host: Option<String>,
}

impl ManifestBuilder {
    pub fn new(canvas_host: Option<String>) -> Self {
        Self { canvas_host }
    }

    /// Group items by kind, ordered by due date (missing last) then id
    pub fn build<'a>(&self, course: &CourseRef, items: impl IntoIterator<Item = &'a Item>) -> Manifest {
        let mut grouped = ManifestItems::default();
        let mut links = LinkSummary::default();

        for item in items {
            for link in &item.links {
                match LinkCategory::of(&link.url, self.canvas_host.as_deref()) {
                    LinkCategory::File => links.files += 1,
                    LinkCategory::Video => links.videos += 1,
                    LinkCategory::External => links.external += 1,
                    LinkCategory::Other => links.other += 1,
                }
            }
            grouped.of_kind_mut(item.kind).push(item.clone());
        }

        let mut counts = BTreeMap::new();
        for kind in ItemKind::ALL {
            let bucket = grouped.of_kind_mut(kind);
            bucket.sort_by(compare_items);
            counts.insert(kind.as_str().to_string(), bucket.len());
        }

        Manifest {
            version: MANIFEST_VERSION,
            course: course.clone(),
            counts,
            links,
            items: grouped,
        }
    }
}

fn compare_items(a: &Item, b: &Item) -> Ordering {
    due_key(a)
        .cmp(&due_key(b))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort key: parsed due dates ascending, then unparseable ones, then none
fn due_key(item: &Item) -> (u8, Option<DateTime<Utc>>, Option<&str>) {
    match item.due_at.as_deref() {
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => (0, Some(ts.as_instant()), None),
            None => (1, None, Some(raw)),
        },
        None => (2, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<Item> {
        vec![
            Item::new("3", ItemKind::Assignment, "Essay").with_due_at("2026-02-10T07:59:00Z"),
            Item::new("1", ItemKind::Assignment, "Reflection"),
            Item::new("2", ItemKind::Assignment, "Lab").with_due_at("2026-01-20T07:59:00Z"),
            Item::new("9", ItemKind::Page, "Syllabus")
                .with_path("pages/Syllabus.txt")
                .with_link("https://canvas.example.edu/courses/1/files/55", "slides")
                .with_link("https://www.youtube.com/watch?v=abc", "lecture")
                .with_link("https://www.cdc.gov/nutrition", "cdc"),
            Item::new("4", ItemKind::Quiz, "Quiz 1").with_due_at("2026-01-20T07:59:00Z"),
        ]
    }

    #[test]
    fn test_grouping_and_order() {
        let builder = ManifestBuilder::new(Some("canvas.example.edu".to_string()));
        let items = items();
        let manifest = builder.build(&CourseRef::new("1", "FDNT 10"), &items);

        let ids: Vec<&str> = manifest.items.assignments.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
        assert_eq!(manifest.counts["assignment"], 3);
        assert_eq!(manifest.counts["quiz"], 1);
        assert_eq!(manifest.total(), 5);

        let order: Vec<&str> = manifest.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["2", "3", "1", "4", "9"]);

        assert_eq!(
            manifest.links,
            LinkSummary {
                files: 1,
                videos: 1,
                external: 1,
                other: 0
            }
        );
        assert_eq!(
            manifest.items.pages[0].local_relative_path.as_deref(),
            Some("pages/Syllabus.txt")
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = ManifestBuilder::default();
        let course = CourseRef::new("1", "FDNT 10");
        let forward = items();
        let mut reversed = items();
        reversed.reverse();

        let a = persist::to_pretty_json(&builder.build(&course, &forward)).unwrap();
        let b = persist::to_pretty_json(&builder.build(&course, &reversed)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_link_category() {
        let host = Some("canvas.example.edu");
        assert_eq!(
            LinkCategory::of("https://canvas.example.edu/courses/1/pages/intro", host),
            LinkCategory::Other
        );
        assert_eq!(
            LinkCategory::of("https://example.zoom.us/rec/share/abc", host),
            LinkCategory::Video
        );
        assert_eq!(LinkCategory::of("mailto:prof@example.edu", host), LinkCategory::Other);
    }
}
