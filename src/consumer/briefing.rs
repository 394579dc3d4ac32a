//! Plain-text weekly briefing.
//!
//! Summarizes a week's graded work per course (due dates, priorities,
//! materials, recordings) into `briefing.txt` inside the week folder.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use tracing::debug;

use crate::core::persist;
use crate::domain::{CourseRef, TaskBundleEntry, Week};

use super::{BundleConsumer, ConsumerArtifact};

pub const BRIEFING_FILE: &str = "briefing.txt";

/// Writes `briefing.txt` for a week
#[derive(Debug, Clone, Default)]
pub struct BriefingWriter;

impl BriefingWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BundleConsumer for BriefingWriter {
    fn name(&self) -> &str {
        "briefing"
    }

    async fn consume(&self, week_dir: &Path, week: &Week) -> Result<Vec<ConsumerArtifact>> {
        let path = week_dir.join(BRIEFING_FILE);
        persist::write_atomic(&path, render_briefing(week)).await?;
        debug!(path = %path.display(), "Wrote briefing");

        Ok(vec![ConsumerArtifact {
            name: BRIEFING_FILE.to_string(),
            path,
        }])
    }
}

/// Render the briefing text for a week
pub fn render_briefing(week: &Week) -> String {
    let span = &week.week;
    let last_day = span.end_date - Duration::days(1);

    let mut lines = vec![
        format!("WEEKLY BRIEFING {} ({} to {})", span.key, span.start_date, last_day),
        "=".repeat(60),
    ];

    let mut by_course: BTreeMap<&CourseRef, Vec<&TaskBundleEntry>> = BTreeMap::new();
    for entry in &week.items {
        by_course.entry(&entry.course).or_default().push(entry);
    }

    if by_course.is_empty() {
        lines.push(String::new());
        lines.push("Nothing due this week.".to_string());
    }

    for (course, entries) in by_course {
        lines.push(String::new());
        lines.push(course.name.clone());
        lines.push("-".repeat(course.name.chars().count().max(8)));

        for entry in entries {
            let mut headline = format!(
                "[{}] {}: {} (on {})",
                entry.priority_hint.to_string().to_uppercase(),
                entry.kind,
                entry.title,
                entry.scheduled_date
            );
            if let Some(points) = entry.points_possible {
                headline.push_str(&format!(", {} pts", points));
            }
            lines.push(headline);

            if let Some(due) = &entry.due_at {
                lines.push(format!("    Due: {}", due));
            }
            for material in &entry.materials {
                let target = material
                    .local_relative_path
                    .as_deref()
                    .or(material.url.as_deref())
                    .unwrap_or_default();
                lines.push(format!("    Material: {} {}", material.title, target).trim_end().to_string());
            }
            for url in &entry.zoom {
                lines.push(format!("    Recording: {}", url));
            }
        }
    }

    if !week.resources.is_empty() {
        lines.push(String::new());
        lines.push("Also this week".to_string());
        lines.push("-".repeat(14));
        for resource in &week.resources {
            lines.push(format!(
                "{} / {}: {} ({})",
                resource.course.name, resource.kind, resource.title, resource.scheduled_date
            ));
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ItemKind, MaterialRef, MaterialSource, PriorityHint, ResourceEntry, TaskKind, WeekSpan,
    };
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn week() -> Week {
        let span = WeekSpan::containing(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap());
        let course = CourseRef::new("1", "FDNT 10");
        Week {
            week: span,
            items: vec![TaskBundleEntry {
                course: course.clone(),
                kind: TaskKind::Assignment,
                id: "5".to_string(),
                title: "Essay 1".to_string(),
                week: span.key,
                scheduled_date: NaiveDate::from_ymd_opt(2026, 1, 22).unwrap(),
                due_at: Some("2026-01-22T23:59:00Z".to_string()),
                prep_for: None,
                points_possible: Some(20.0),
                direct_url: None,
                local_relative_path: None,
                materials: vec![MaterialRef {
                    title: "Rubric".to_string(),
                    source: MaterialSource::Link,
                    kind: Some(ItemKind::File),
                    url: None,
                    local_relative_path: Some("FDNT 10/files/rubric.pdf".to_string()),
                }],
                zoom: vec!["https://ucsd.zoom.us/rec/share/abc".to_string()],
                priority_hint: PriorityHint::High,
                task_bundle_relative_path: "x/tasks/essay.md".to_string(),
                instructions: None,
            }],
            resources: vec![ResourceEntry {
                course,
                kind: ItemKind::Announcement,
                id: "9".to_string(),
                title: "Welcome".to_string(),
                week: span.key,
                scheduled_date: NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),
                direct_url: None,
                local_relative_path: None,
            }],
        }
    }

    #[test]
    fn test_render_groups_by_course() {
        let text = render_briefing(&week());
        assert!(text.starts_with("WEEKLY BRIEFING 2026-W04 (2026-01-19 to 2026-01-25)"));
        assert!(text.contains("[HIGH] assignment: Essay 1 (on 2026-01-22), 20 pts"));
        assert!(text.contains("    Material: Rubric FDNT 10/files/rubric.pdf"));
        assert!(text.contains("    Recording: https://ucsd.zoom.us/rec/share/abc"));
        assert!(text.contains("FDNT 10 / announcement: Welcome (2026-01-19)"));
    }

    #[tokio::test]
    async fn test_consume_leaves_week_json_untouched() {
        let temp = TempDir::new().unwrap();
        let week_json = temp.path().join("week.json");
        std::fs::write(&week_json, "{\"sentinel\":true}\n").unwrap();

        let artifacts = BriefingWriter::new().consume(temp.path(), &week()).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].path.ends_with(BRIEFING_FILE));
        assert_eq!(std::fs::read_to_string(&week_json).unwrap(), "{\"sentinel\":true}\n");
    }
}
