//! Sync engine.
//!
//! Drives one sync run: list courses, then for each course fetch every item
//! kind, classify against the registry, materialize what changed, persist the
//! registry and rebuild the manifest. Optionally finishes by regenerating the
//! weekly bundles from every manifest on disk.
//!
//! A failing course is logged and skipped; only a failure to list courses
//! aborts the run.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Fetcher, Materializer};
use crate::config::paths::Layout;
use crate::domain::{CourseRef, Item, ItemKind, SyncCounts, SyncEvent, SyncEventType};

use super::bundler::{load_manifests, WeeklyBundler};
use super::detector::classify;
use super::emit::{BundleWriter, EmitSummary};
use super::manifest::ManifestBuilder;
use super::registry::Registry;
use super::sync_log::SyncLog;

/// Errors taking the single-writer lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another sync is already running (lock held on {})", .0.display())]
    Busy(PathBuf),

    #[error("failed to open lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive advisory lock over the download tree.
///
/// Released when dropped.
#[derive(Debug)]
pub struct SyncLock {
    _file: File,
    path: PathBuf,
}

impl SyncLock {
    /// Take the lock without waiting
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| LockError::Busy(path.to_path_buf()))?;

        debug!(path = %path.display(), "Acquired sync lock");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What a run should do
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Treat every fetched item as new
    pub force: bool,

    /// Only sync courses matching this name/code/id fragment
    pub course_filter: Option<String>,

    /// Regenerate weekly bundles after syncing
    pub bundle: bool,

    /// Date bundles are computed for (defaults to the bundler's today)
    pub today: Option<NaiveDate>,
}

/// Outcome for one course
#[derive(Debug, Clone)]
pub struct CourseReport {
    pub course: CourseRef,
    pub counts: SyncCounts,
    /// Whether the registry document was rewritten
    pub registry_written: bool,
    /// Items held in the registry after the run
    pub tracked: usize,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub courses: Vec<CourseReport>,
    /// Courses skipped with the reason
    pub skipped: Vec<(CourseRef, String)>,
    pub bundle: Option<EmitSummary>,
}

impl SyncReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            courses: Vec::new(),
            skipped: Vec::new(),
            bundle: None,
        }
    }

    /// Counters summed over every synced course
    pub fn totals(&self) -> SyncCounts {
        let mut totals = SyncCounts::default();
        for course in &self.courses {
            totals.add(&course.counts);
        }
        totals
    }
}

/// The sync engine
pub struct SyncEngine {
    layout: Layout,
    fetcher: Box<dyn Fetcher>,
    materializer: Box<dyn Materializer>,
    manifests: ManifestBuilder,
    bundler: Option<WeeklyBundler>,
    log: SyncLog,
    kinds: Vec<ItemKind>,
}

impl SyncEngine {
    pub fn new(layout: Layout, fetcher: Box<dyn Fetcher>, materializer: Box<dyn Materializer>) -> Self {
        let log = SyncLog::new(layout.sync_log_path());
        Self {
            layout,
            fetcher,
            materializer,
            manifests: ManifestBuilder::new(None),
            bundler: None,
            log,
            kinds: ItemKind::ALL.to_vec(),
        }
    }

    /// Host used to classify manifest links as internal
    pub fn with_canvas_host(mut self, host: Option<String>) -> Self {
        self.manifests = ManifestBuilder::new(host);
        self
    }

    /// Bundler used when a run asks for bundles
    pub fn with_bundler(mut self, bundler: WeeklyBundler) -> Self {
        self.bundler = Some(bundler);
        self
    }

    /// Restrict which item kinds are fetched
    pub fn with_kinds(mut self, kinds: Vec<ItemKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Run a sync over every (matching) course
    #[instrument(skip(self, options), fields(fetcher = %self.fetcher.name(), force = options.force))]
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let mut report = SyncReport::new(run_id);
        info!(%run_id, "Starting sync run");

        let summary = if options.force { "Sync started (force)" } else { "Sync started" };
        self.log
            .append(&SyncEvent::new(run_id, SyncEventType::RunStarted, summary))
            .await?;

        let courses = match self.fetcher.list_courses().await {
            Ok(courses) => courses,
            Err(e) => {
                let event = SyncEvent::new(run_id, SyncEventType::RunCompleted, "Failed to list courses")
                    .with_error(format!("{:#}", e));
                self.log.append(&event).await?;
                return Err(e.context("Failed to list courses"));
            }
        };

        let courses: Vec<CourseRef> = courses
            .into_iter()
            .filter(|course| {
                options
                    .course_filter
                    .as_deref()
                    .map_or(true, |filter| course.matches_filter(filter))
            })
            .collect();
        info!(courses = courses.len(), "Courses to sync");

        for course in &courses {
            match self.sync_course(course, options.force).await {
                Ok(course_report) => {
                    let event = SyncEvent::new(
                        run_id,
                        SyncEventType::CourseSynced,
                        format!("Synced {}", course.name),
                    )
                    .for_course(&course.id)
                    .with_counts(course_report.counts);
                    self.log.append(&event).await?;
                    report.courses.push(course_report);
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!(course = %course.name, error = %reason, "Skipping course");
                    let event = SyncEvent::new(
                        run_id,
                        SyncEventType::CourseSkipped,
                        format!("Skipped {}", course.name),
                    )
                    .for_course(&course.id)
                    .with_error(&reason);
                    self.log.append(&event).await?;
                    report.skipped.push((course.clone(), reason));
                }
            }
        }

        if options.bundle {
            for course in report.courses.iter().map(|r| &r.course) {
                if !self.layout.manifest_path(course).exists() {
                    warn!(course = %course.name, "No manifest for course, it will be missing from bundles");
                }
            }
            let bundler = self
                .bundler
                .as_ref()
                .context("Bundling requested but no bundler configured")?;
            let today = options.today.unwrap_or_else(|| bundler.today());
            let summary =
                write_bundles(&self.layout, bundler, today, options.course_filter.as_deref()).await?;
            self.log.append(&bundle_event(run_id, &summary)).await?;
            report.bundle = Some(summary);
        }

        let totals = report.totals();
        let event = SyncEvent::new(
            run_id,
            SyncEventType::RunCompleted,
            format!(
                "Synced {} course(s), skipped {}",
                report.courses.len(),
                report.skipped.len()
            ),
        )
        .with_counts(totals);
        self.log.append(&event).await?;

        info!(
            %run_id,
            new = totals.new,
            updated = totals.updated,
            unchanged = totals.unchanged,
            skipped = report.skipped.len(),
            "Sync run completed"
        );

        Ok(report)
    }

    /// Sync a single course end to end
    #[instrument(skip(self, course), fields(course = %course.name))]
    pub async fn sync_course(&self, course: &CourseRef, force: bool) -> Result<CourseReport> {
        let registry_path = self.layout.registry_path(course);
        let mut registry = Registry::load_or_empty(&registry_path, course).await;
        let mut counts = SyncCounts::default();

        let mut fetched = Vec::new();
        for kind in &self.kinds {
            let items = self
                .fetcher
                .list_items(&course.id, *kind)
                .await
                .with_context(|| format!("Failed to fetch {}", kind.folder()))?;
            debug!(kind = %kind, count = items.len(), "Fetched items");
            fetched.extend(items);
        }

        let (mut fetched, malformed) = accept_items(fetched);
        counts.malformed = malformed;
        annotate_modules(&mut fetched);

        let snapshot = if force {
            Registry::new(course.clone())
        } else {
            registry.clone()
        };
        let changes = classify(&snapshot, fetched, |item| {
            self.materializer.is_missing(course, item)
        });
        counts.unchanged = changes.unchanged.len();

        let now = Utc::now();
        for (mut item, is_new) in changes
            .new
            .into_iter()
            .map(|item| (item, true))
            .chain(changes.updated.into_iter().map(|item| (item, false)))
        {
            if item.stored_path().is_none() {
                item.local_relative_path = registry
                    .get(&item.key())
                    .and_then(Item::stored_path)
                    .map(String::from);
            }
            match self.materializer.write_item(course, &item).await {
                Ok(path) => {
                    item.local_relative_path = Some(path);
                    registry.upsert(item, now);
                    if is_new {
                        counts.new += 1;
                    } else {
                        counts.updated += 1;
                    }
                }
                Err(e) => {
                    warn!(item = %item.key(), error = %format!("{:#}", e), "Failed to materialize item");
                    counts.failed += 1;
                }
            }
        }

        for item in changes.unchanged {
            registry.refresh(item);
        }

        let registry_written = registry.save_if_changed(&registry_path).await?;

        let manifest = self.manifests.build(course, registry.items());
        manifest.save(&self.layout.manifest_path(course)).await?;

        info!(
            new = counts.new,
            updated = counts.updated,
            unchanged = counts.unchanged,
            malformed = counts.malformed,
            failed = counts.failed,
            "Course synced"
        );

        Ok(CourseReport {
            course: course.clone(),
            counts,
            registry_written,
            tracked: registry.len(),
        })
    }
}

/// Regenerate the weekly bundles without syncing
pub async fn bundle_only(
    layout: &Layout,
    bundler: &WeeklyBundler,
    today: NaiveDate,
    course_filter: Option<&str>,
    log: &SyncLog,
) -> Result<EmitSummary> {
    let run_id = Uuid::new_v4();
    log.append(&SyncEvent::new(run_id, SyncEventType::RunStarted, "Bundle-only run started"))
        .await?;

    let summary = write_bundles(layout, bundler, today, course_filter).await?;
    log.append(&bundle_event(run_id, &summary)).await?;
    log.append(&SyncEvent::new(run_id, SyncEventType::RunCompleted, "Bundle-only run completed"))
        .await?;

    Ok(summary)
}

/// Bundle the manifests under the root as of `today`, optionally only matching courses
pub async fn write_bundles(
    layout: &Layout,
    bundler: &WeeklyBundler,
    today: NaiveDate,
    course_filter: Option<&str>,
) -> Result<EmitSummary> {
    let manifests = load_manifests(layout, course_filter).await?;
    info!(courses = manifests.len(), %today, "Building weekly bundles");

    let output = bundler.build(&manifests, today);
    BundleWriter::new(layout.clone()).write(&output).await
}

fn bundle_event(run_id: Uuid, summary: &EmitSummary) -> SyncEvent {
    SyncEvent::new(
        run_id,
        SyncEventType::BundleWritten,
        format!(
            "Wrote {} week(s), {} task(s); {} future week(s), {} unscheduled",
            summary.weeks_written, summary.tasks_written, summary.future_weeks, summary.unscheduled
        ),
    )
}

/// Drop malformed items and repeated keys; returns the kept items and the
/// number rejected
fn accept_items(fetched: Vec<Item>) -> (Vec<Item>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(fetched.len());
    let mut rejected = 0;

    for item in fetched {
        if let Err(e) = item.validate() {
            warn!(error = %e, "Ignoring malformed item");
            rejected += 1;
            continue;
        }
        if !seen.insert(item.key()) {
            debug!(item = %item.key(), "Ignoring repeated item in listing");
            continue;
        }
        kept.push(item);
    }

    (kept, rejected)
}

/// Copy module names from module items onto the assignments and quizzes
/// they point at
fn annotate_modules(items: &mut [Item]) {
    let mut modules: HashMap<(ItemKind, String), String> = HashMap::new();

    for item in items.iter().filter(|item| item.kind == ItemKind::ModuleItem) {
        let kind = match item.extra.get("module_type").and_then(Value::as_str) {
            Some("Assignment") => ItemKind::Assignment,
            Some("Quiz") => ItemKind::Quiz,
            _ => continue,
        };
        let content_id = match item.extra.get("content_id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => continue,
        };
        if let Some(name) = item.module_name() {
            modules
                .entry((kind, content_id))
                .or_insert_with(|| name.to_string());
        }
    }

    for item in items.iter_mut() {
        if !item.kind.is_task() || item.module_name().is_some() {
            continue;
        }
        if let Some(name) = modules.get(&(item.kind, item.id.clone())) {
            item.extra
                .insert("module_name".to_string(), Value::String(name.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accept_items_drops_malformed_and_repeats() {
        let items = vec![
            Item::new("1", ItemKind::Page, "Welcome"),
            Item::new("", ItemKind::Page, "No id"),
            Item::new("1", ItemKind::Page, "Welcome again"),
            Item::new("1", ItemKind::File, "Same id, other kind"),
        ];

        let (kept, rejected) = accept_items(items);
        assert_eq!(rejected, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "Welcome");
    }

    #[test]
    fn test_annotate_modules_from_module_items() {
        let mut items = vec![
            Item::new("10", ItemKind::Assignment, "Essay"),
            Item::new("11", ItemKind::Quiz, "Quiz 1").with_extra("module_name", "Existing"),
            Item::new("900", ItemKind::ModuleItem, "Essay")
                .with_extra("module_name", "Week 2")
                .with_extra("module_type", "Assignment")
                .with_extra("content_id", 10),
            Item::new("901", ItemKind::ModuleItem, "Quiz 1")
                .with_extra("module_name", "Week 3")
                .with_extra("module_type", "Quiz")
                .with_extra("content_id", 11),
        ];

        annotate_modules(&mut items);
        assert_eq!(items[0].module_name(), Some("Week 2"));
        assert_eq!(items[1].module_name(), Some("Existing"));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("sync.lock");

        let held = SyncLock::acquire(&path).unwrap();
        assert!(matches!(SyncLock::acquire(&path), Err(LockError::Busy(_))));

        drop(held);
        assert!(SyncLock::acquire(&path).is_ok());
    }
}
