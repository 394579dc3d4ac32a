//! Course content items.
//!
//! An [`Item`] is one piece of Canvas content (assignment, quiz, page, ...)
//! as last observed by a fetch. Items are identified by `(course, kind, id)`
//! and are never deleted once seen.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when a fetched item cannot be tracked
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("{kind} item '{title}' has no id")]
    MissingId { kind: ItemKind, title: String },
}

/// Kind of course content
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Assignment,
    Quiz,
    Page,
    Announcement,
    File,
    Discussion,
    ModuleItem,
}

impl ItemKind {
    /// Every kind, in manifest order
    pub const ALL: [ItemKind; 7] = [
        ItemKind::Assignment,
        ItemKind::Quiz,
        ItemKind::Page,
        ItemKind::Announcement,
        ItemKind::File,
        ItemKind::Discussion,
        ItemKind::ModuleItem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Assignment => "assignment",
            ItemKind::Quiz => "quiz",
            ItemKind::Page => "page",
            ItemKind::Announcement => "announcement",
            ItemKind::File => "file",
            ItemKind::Discussion => "discussion",
            ItemKind::ModuleItem => "module_item",
        }
    }

    /// Graded work that gets a task entry in week bundles
    pub fn is_task(&self) -> bool {
        matches!(self, ItemKind::Assignment | ItemKind::Quiz)
    }

    /// Folder name used under a course directory
    pub fn folder(&self) -> &'static str {
        match self {
            ItemKind::Assignment => "assignments",
            ItemKind::Quiz => "quizzes",
            ItemKind::Page => "pages",
            ItemKind::Announcement => "announcements",
            ItemKind::File => "files",
            ItemKind::Discussion => "discussions",
            ItemKind::ModuleItem => "modules",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "assignment" | "assignments" => Ok(ItemKind::Assignment),
            "quiz" | "quizzes" => Ok(ItemKind::Quiz),
            "page" | "pages" | "wiki_page" => Ok(ItemKind::Page),
            "announcement" | "announcements" => Ok(ItemKind::Announcement),
            "file" | "files" | "attachment" => Ok(ItemKind::File),
            "discussion" | "discussions" | "discussion_topic" => Ok(ItemKind::Discussion),
            "module_item" | "module" | "modules" => Ok(ItemKind::ModuleItem),
            _ => anyhow::bail!("Unknown item kind: {}", s),
        }
    }
}

/// Stable identity of an item within one course
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub id: String,
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A URL extracted from an item's body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl Link {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
        }
    }
}

/// A unit of course content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier scoped to course + kind
    pub id: String,

    pub kind: ItemKind,

    #[serde(default)]
    pub title: String,

    /// Raw due timestamp as reported by Canvas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Source URL in Canvas (or the external target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,

    /// Path relative to the course directory, set once materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_relative_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    /// Plain-text instructions extracted from the HTML body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Fields we don't model (points_possible, submission_types, module_name, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    pub fn new(id: impl Into<String>, kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            due_at: None,
            unlock_at: None,
            updated_at: None,
            direct_url: None,
            local_relative_path: None,
            content_hash: None,
            links: Vec::new(),
            description: None,
            extra: Map::new(),
        }
    }

    pub fn with_due_at(mut self, due_at: impl Into<String>) -> Self {
        self.due_at = Some(due_at.into());
        self
    }

    pub fn with_unlock_at(mut self, unlock_at: impl Into<String>) -> Self {
        self.unlock_at = Some(unlock_at.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.direct_url = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.local_relative_path = Some(path.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_link(mut self, url: impl Into<String>, label: impl Into<String>) -> Self {
        self.links.push(Link::new(url, label));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            kind: self.kind,
            id: self.id.clone(),
        }
    }

    /// Reject items that cannot be tracked across runs
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.id.trim().is_empty() {
            return Err(ItemError::MissingId {
                kind: self.kind,
                title: self.title.clone(),
            });
        }
        Ok(())
    }

    /// The date used for week bucketing: due date, else unlock date
    pub fn schedule_raw(&self) -> Option<&str> {
        non_empty(self.due_at.as_deref()).or_else(|| non_empty(self.unlock_at.as_deref()))
    }

    /// Stored path, ignoring empty strings
    pub fn stored_path(&self) -> Option<&str> {
        non_empty(self.local_relative_path.as_deref())
    }

    pub fn points_possible(&self) -> Option<f64> {
        self.extra.get("points_possible").and_then(Value::as_f64)
    }

    pub fn submission_types(&self) -> Vec<&str> {
        self.extra
            .get("submission_types")
            .and_then(Value::as_array)
            .map(|types| types.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn module_name(&self) -> Option<&str> {
        self.extra.get("module_name").and_then(Value::as_str)
    }

    /// Replace this item's fields with a newer observation.
    ///
    /// A stored path is never replaced by an empty one.
    pub fn absorb(&mut self, newer: Item) {
        let previous_path = self.local_relative_path.take();
        *self = newer;
        if self.stored_path().is_none() {
            self.local_relative_path = previous_path;
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_roundtrip_keeps_unknown_fields() {
        let json = r#"{
            "id": "42",
            "kind": "assignment",
            "title": "Essay 1",
            "due_at": "2026-01-26T07:59:00Z",
            "points_possible": 20.0,
            "submission_types": ["online_upload"]
        }"#;

        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, ItemKind::Assignment);
        assert_eq!(item.points_possible(), Some(20.0));
        assert_eq!(item.submission_types(), vec!["online_upload"]);

        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["points_possible"], 20.0);
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let item = Item::new("  ", ItemKind::Page, "Welcome");
        assert!(matches!(
            item.validate(),
            Err(ItemError::MissingId { kind: ItemKind::Page, .. })
        ));
        assert!(Item::new("7", ItemKind::Page, "Welcome").validate().is_ok());
    }

    #[test]
    fn test_schedule_prefers_due_date() {
        let item = Item::new("1", ItemKind::Quiz, "Quiz 1")
            .with_unlock_at("2026-01-10")
            .with_due_at("2026-01-12");
        assert_eq!(item.schedule_raw(), Some("2026-01-12"));

        let item = Item::new("1", ItemKind::Quiz, "Quiz 1")
            .with_unlock_at("2026-01-10")
            .with_due_at("");
        assert_eq!(item.schedule_raw(), Some("2026-01-10"));
    }

    #[test]
    fn test_absorb_keeps_existing_path() {
        let mut stored = Item::new("1", ItemKind::File, "syllabus.pdf").with_path("files/syllabus.pdf");
        stored.absorb(
            Item::new("1", ItemKind::File, "Syllabus v2.pdf").with_updated_at("2026-02-01T00:00:00Z"),
        );
        assert_eq!(stored.title, "Syllabus v2.pdf");
        assert_eq!(stored.local_relative_path.as_deref(), Some("files/syllabus.pdf"));

        stored.absorb(Item::new("1", ItemKind::File, "Syllabus v3.pdf").with_path(""));
        assert_eq!(stored.local_relative_path.as_deref(), Some("files/syllabus.pdf"));

        stored.absorb(Item::new("1", ItemKind::File, "Syllabus v3.pdf").with_path("files/v3.pdf"));
        assert_eq!(stored.local_relative_path.as_deref(), Some("files/v3.pdf"));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("quizzes".parse::<ItemKind>().unwrap(), ItemKind::Quiz);
        assert_eq!("discussion_topic".parse::<ItemKind>().unwrap(), ItemKind::Discussion);
        assert!("podcast".parse::<ItemKind>().is_err());
    }
}
