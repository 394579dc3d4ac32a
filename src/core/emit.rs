//! Bundle emission.
//!
//! Writes a [`BundleOutput`] under the weekly directory. Every run rewrites
//! the global documents and each released week in full; weeks that have not
//! started yet appear only in `_index.json`. Week folders that are no longer
//! released are removed.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info};

use crate::config::paths::{Layout, TASKS_DIR};
use crate::domain::{MaterialSource, TaskBundleEntry, TaskKind, WeekKey};

use super::bundler::BundleOutput;
use super::persist;

/// What one emission wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    pub weeks_written: usize,
    pub tasks_written: usize,
    /// Weeks indexed but held back until they start
    pub future_weeks: usize,
    pub unscheduled: usize,
    /// Week folders removed because their week is no longer released
    pub weeks_removed: usize,
}

/// Writes bundle documents under `<root>/_weekly`
pub struct BundleWriter {
    layout: Layout,
}

impl BundleWriter {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub async fn write(&self, output: &BundleOutput) -> Result<EmitSummary> {
        let mut summary = EmitSummary {
            unscheduled: output.unscheduled.items.len(),
            ..Default::default()
        };

        persist::save_json(&self.layout.index_path(), &output.index).await?;
        persist::save_json(&self.layout.all_items_path(), &output.all_items).await?;
        persist::save_json(&self.layout.unscheduled_path(), &output.unscheduled).await?;

        let mut released = HashSet::new();
        for week in &output.weeks {
            if !week.week.is_released(output.today) {
                debug!(week = %week.week.key, "Week not started yet, indexed only");
                summary.future_weeks += 1;
                continue;
            }

            let tasks_dir = self.layout.week_dir(&week.week).join(TASKS_DIR);
            if tasks_dir.exists() {
                fs::remove_dir_all(&tasks_dir)
                    .await
                    .with_context(|| format!("Failed to clear {}", tasks_dir.display()))?;
            }

            persist::save_json(&self.layout.week_file(&week.week), week).await?;

            for entry in &week.items {
                let path = self.layout.weekly_dir().join(&entry.task_bundle_relative_path);
                persist::write_atomic(&path, render_task_document(entry)).await?;
                summary.tasks_written += 1;
            }
            summary.weeks_written += 1;
            released.insert(week.week.folder_name());
        }

        summary.weeks_removed = self.remove_stale_weeks(&released).await?;

        info!(
            weeks = summary.weeks_written,
            tasks = summary.tasks_written,
            future = summary.future_weeks,
            removed = summary.weeks_removed,
            "Wrote weekly bundles"
        );

        Ok(summary)
    }

    /// Delete week folders outside `keep`; other entries are left alone
    async fn remove_stale_weeks(&self, keep: &HashSet<String>) -> Result<usize> {
        let weekly_dir = self.layout.weekly_dir();
        let mut entries = fs::read_dir(&weekly_dir)
            .await
            .with_context(|| format!("Failed to list {}", weekly_dir.display()))?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if keep.contains(&name) || !is_week_folder(&name) || !entry.file_type().await?.is_dir() {
                continue;
            }
            fs::remove_dir_all(entry.path())
                .await
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            debug!(folder = %name, "Removed stale week folder");
            removed += 1;
        }
        Ok(removed)
    }
}

/// `2026-W04_2026-01-19`
fn is_week_folder(name: &str) -> bool {
    name.split_once('_').is_some_and(|(key, start)| {
        key.parse::<WeekKey>().is_ok() && chrono::NaiveDate::parse_from_str(start, "%Y-%m-%d").is_ok()
    })
}

/// Self-contained Markdown document for one task entry
pub fn render_task_document(entry: &TaskBundleEntry) -> String {
    let mut lines = vec![format!("# {}", entry.title), String::new()];

    let course = match entry.course.code.as_deref() {
        Some(code) => format!("{} ({})", entry.course.name, code),
        None => entry.course.name.clone(),
    };
    lines.push(format!("- Course: {}", course));
    lines.push(format!("- Kind: {}", entry.kind));
    lines.push(format!("- Week: {} (scheduled {})", entry.week, entry.scheduled_date));
    if let Some(due) = &entry.due_at {
        lines.push(format!("- Due: {}", due));
    }
    if let Some(parent) = &entry.prep_for {
        lines.push(format!("- Prep for: item {}", parent));
    }
    if let Some(points) = entry.points_possible {
        lines.push(format!("- Points: {}", points));
    }
    lines.push(format!("- Priority: {}", entry.priority_hint));
    if let Some(url) = &entry.direct_url {
        lines.push(format!("- Canvas: {}", url));
    }
    if let Some(path) = &entry.local_relative_path {
        lines.push(format!("- Local copy: {}", path));
    }

    lines.push(String::new());
    lines.push("## Instructions".to_string());
    lines.push(String::new());
    if entry.kind == TaskKind::Prep {
        lines.push(format!(
            "Get ready for \"{}\": review the materials below before the due date.",
            entry.title.trim_start_matches("Prep: ")
        ));
        lines.push(String::new());
    }
    match entry.instructions.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => lines.push(text.to_string()),
        _ => lines.push("_No instructions captured._".to_string()),
    }

    lines.push(String::new());
    lines.push("## Materials".to_string());
    lines.push(String::new());
    if entry.materials.is_empty() {
        lines.push("_None found._".to_string());
    }
    for material in &entry.materials {
        let origin = match material.source {
            MaterialSource::Link => "linked",
            MaterialSource::Module => "module",
        };
        let target = match (&material.local_relative_path, &material.url) {
            (Some(path), _) => format!("`{}`", path),
            (None, Some(url)) => url.clone(),
            (None, None) => String::new(),
        };
        lines.push(format!("- {} [{}] {}", material.title, origin, target).trim_end().to_string());
    }

    if !entry.zoom.is_empty() {
        lines.push(String::new());
        lines.push("## Recordings".to_string());
        lines.push(String::new());
        for url in &entry.zoom {
            lines.push(format!("- {}", url));
        }
    }

    let mut doc = lines.join("\n");
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleSettings;
    use crate::core::bundler::WeeklyBundler;
    use crate::core::manifest::ManifestBuilder;
    use crate::domain::{CourseRef, Item, ItemKind, TimeBasis};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn output(today: NaiveDate) -> BundleOutput {
        let items = vec![
            Item::new("1", ItemKind::Assignment, "Food Log")
                .with_due_at("2026-01-22")
                .with_description("Track everything you eat for 3 days.")
                .with_link("https://www.myplate.gov/", "MyPlate"),
            Item::new("2", ItemKind::Quiz, "Quiz 2").with_due_at("2026-02-04"),
        ];
        let manifest = ManifestBuilder::default().build(&CourseRef::new("1", "FDNT 10"), &items);
        WeeklyBundler::new(BundleSettings::default())
            .unwrap()
            .with_basis(TimeBasis::utc())
            .build(&[manifest], today)
    }

    #[tokio::test]
    async fn test_future_weeks_are_indexed_only() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path(), temp.path().join("home"));
        let today = NaiveDate::from_ymd_opt(2026, 1, 21).unwrap();

        let summary = BundleWriter::new(layout.clone()).write(&output(today)).await.unwrap();
        assert_eq!(summary.weeks_written, 1);
        assert_eq!(summary.future_weeks, 1);

        assert!(layout.weekly_dir().join("2026-W04_2026-01-19/week.json").exists());
        assert!(!layout.weekly_dir().join("2026-W06_2026-02-02").exists());
        assert!(layout.index_path().exists());
    }

    #[tokio::test]
    async fn test_rewrite_drops_stale_task_documents() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path(), temp.path().join("home"));
        let today = NaiveDate::from_ymd_opt(2026, 1, 21).unwrap();
        let writer = BundleWriter::new(layout.clone());

        writer.write(&output(today)).await.unwrap();
        let tasks = layout.weekly_dir().join("2026-W04_2026-01-19").join(TASKS_DIR);
        std::fs::write(tasks.join("stale.md"), "old").unwrap();

        writer.write(&output(today)).await.unwrap();
        assert!(!tasks.join("stale.md").exists());
        assert_eq!(std::fs::read_dir(&tasks).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_weeks_no_longer_released_are_removed() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path(), temp.path().join("home"));
        let writer = BundleWriter::new(layout.clone());

        // A later `today` releases week 6 as well
        let later = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert_eq!(writer.write(&output(later)).await.unwrap().weeks_written, 2);
        let week6 = layout.weekly_dir().join("2026-W06_2026-02-02");
        assert!(week6.join("week.json").exists());
        std::fs::create_dir_all(layout.weekly_dir().join("notes")).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 1, 21).unwrap();
        let summary = writer.write(&output(today)).await.unwrap();
        assert_eq!(summary.weeks_removed, 1);
        assert!(!week6.exists());
        assert!(layout.weekly_dir().join("2026-W04_2026-01-19/week.json").exists());
        assert!(layout.weekly_dir().join("notes").exists());
    }

    #[test]
    fn test_is_week_folder() {
        assert!(is_week_folder("2026-W04_2026-01-19"));
        assert!(!is_week_folder("notes"));
        assert!(!is_week_folder("2026-W04"));
        assert!(!is_week_folder("_index.json"));
    }

    #[test]
    fn test_task_document_content() {
        let out = output(NaiveDate::from_ymd_opt(2026, 1, 21).unwrap());
        let entry = out.all_items.tasks.iter().find(|t| t.id == "1").unwrap();
        let doc = render_task_document(entry);

        assert!(doc.starts_with("# Food Log\n"));
        assert!(doc.contains("- Priority: high"));
        assert!(doc.contains("Track everything you eat for 3 days."));
        assert!(doc.contains("- MyPlate [linked] https://www.myplate.gov/"));
        assert!(!doc.contains("## Recordings"));
    }
}
