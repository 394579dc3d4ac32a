//! Weekly bundler.
//!
//! Turns course manifests into ISO-week buckets of task entries (graded
//! items plus synthesized prep reminders) and dated resources. Building is
//! pure: the same manifests and the same `today` always produce the same
//! [`BundleOutput`]. Writing it to disk lives in [`super::emit`].

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::config::paths::{sanitize_filename, Layout, TASKS_DIR};
use crate::config::BundleSettings;
use crate::domain::{
    parse_timestamp, AllItems, CourseRef, IndexEntry, Item, ItemKind, MaterialRef, MaterialSource,
    PriorityHint, ResourceEntry, TaskBundleEntry, TaskKind, TimeBasis, Unscheduled,
    UnscheduledEntry, UnscheduledReason, Week, WeekIndex, WeekKey, WeekSpan,
};

use super::manifest::{Manifest, MANIFEST_VERSION};

/// Recording-portal URL shapes recognized out of the box
const DEFAULT_ZOOM_PATTERNS: [&str; 3] = [
    r#"^https?://[^/\s]*zoom\.us/rec/"#,
    r#"^https?://[^/\s]*zoom\.us/j/"#,
    r#"^https?://applications\.zoom\.us/lti"#,
];

/// Canvas file references (`/courses/1/files/55/download?wrap=1`)
const FILE_REF_PATTERN: &str = r"/files/(\d+)";

/// Matches recording-portal links
#[derive(Debug, Clone)]
pub struct ZoomMatcher {
    patterns: Vec<Regex>,
}

impl ZoomMatcher {
    /// Built-in patterns plus configured extras
    pub fn new(extra: &[String]) -> Result<Self> {
        let patterns = DEFAULT_ZOOM_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().cloned())
            .map(|p| Regex::new(&p).with_context(|| format!("Invalid zoom pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_zoom(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }
}

/// Everything one bundling run computes
#[derive(Debug, Clone, PartialEq)]
pub struct BundleOutput {
    pub today: NaiveDate,
    /// Every computed week, released or not, in key order
    pub weeks: Vec<Week>,
    pub index: WeekIndex,
    pub all_items: AllItems,
    pub unscheduled: Unscheduled,
}

impl BundleOutput {
    /// Weeks that have started and get a `week.json`
    pub fn released_weeks(&self) -> impl Iterator<Item = &Week> {
        let today = self.today;
        self.weeks.iter().filter(move |w| w.week.is_released(today))
    }

    pub fn week(&self, key: WeekKey) -> Option<&Week> {
        self.weeks.iter().find(|w| w.week.key == key)
    }
}

/// Builds week bundles from manifests
#[derive(Debug, Clone)]
pub struct WeeklyBundler {
    settings: BundleSettings,
    basis: TimeBasis,
    zoom: ZoomMatcher,
    file_ref: Regex,
}

impl WeeklyBundler {
    pub fn new(settings: BundleSettings) -> Result<Self> {
        let zoom = ZoomMatcher::new(&settings.zoom_patterns)?;
        let file_ref = Regex::new(FILE_REF_PATTERN).context("Invalid file reference pattern")?;
        let basis = TimeBasis::from_offset_minutes(settings.utc_offset_minutes);
        Ok(Self {
            settings,
            basis,
            zoom,
            file_ref,
        })
    }

    /// Override the clock used to turn due instants into dates
    pub fn with_basis(mut self, basis: TimeBasis) -> Self {
        self.basis = basis;
        self
    }

    /// Today's date in the bundler's time basis
    pub fn today(&self) -> NaiveDate {
        self.basis.today()
    }

    /// Bucket every manifest's items into weeks as of `today`
    pub fn build(&self, manifests: &[Manifest], today: NaiveDate) -> BundleOutput {
        let mut ordered: Vec<&Manifest> = manifests.iter().collect();
        ordered.sort_by(|a, b| a.course.cmp(&b.course));
        ordered.dedup_by(|later, first| {
            let duplicate = later.course.id == first.course.id;
            if duplicate {
                warn!(course = %later.course.name, "Duplicate manifest for course, ignoring");
            }
            duplicate
        });

        let mut acc = Accumulator::default();
        for manifest in ordered {
            self.bundle_course(manifest, today, &mut acc);
        }

        acc.finish(today)
    }

    fn bundle_course(&self, manifest: &Manifest, today: NaiveDate, acc: &mut Accumulator) {
        let ctx = CourseContext::new(manifest, &self.settings.module_dir);
        debug!(course = %ctx.course.name, items = manifest.total(), "Bundling course");

        for item in manifest.items.iter() {
            let Some(raw) = item.schedule_raw() else {
                acc.unscheduled.push(ctx.unscheduled(item, UnscheduledReason::NoDate, None));
                continue;
            };
            let Some(timestamp) = parse_timestamp(raw) else {
                debug!(id = %item.id, raw, "Unparseable date, routing to unscheduled");
                acc.unscheduled.push(ctx.unscheduled(
                    item,
                    UnscheduledReason::UnparseableDate,
                    Some(raw.to_string()),
                ));
                continue;
            };
            let date = timestamp.local_date(self.basis);

            if item.kind.is_task() {
                self.bundle_task(&ctx, item, date, today, acc);
            } else {
                let span = WeekSpan::containing(date);
                acc.week(span).resources.push(ResourceEntry {
                    course: ctx.course.clone(),
                    kind: item.kind,
                    id: item.id.clone(),
                    title: item.title.clone(),
                    week: span.key,
                    scheduled_date: date,
                    direct_url: item.direct_url.clone(),
                    local_relative_path: ctx.root_path(item),
                });
            }
        }
    }

    fn bundle_task(
        &self,
        ctx: &CourseContext<'_>,
        item: &Item,
        date: NaiveDate,
        today: NaiveDate,
        acc: &mut Accumulator,
    ) {
        let materials = self.materials(ctx, item);
        let zoom = self.zoom_links(ctx, item, &materials);
        let participation = self.is_participation(item);
        let kind = match item.kind {
            ItemKind::Quiz => TaskKind::Quiz,
            _ => TaskKind::Assignment,
        };

        let span = WeekSpan::containing(date);
        let entry = TaskBundleEntry {
            course: ctx.course.clone(),
            kind,
            id: item.id.clone(),
            title: item.title.clone(),
            week: span.key,
            scheduled_date: date,
            due_at: item.due_at.clone(),
            prep_for: None,
            points_possible: item.points_possible(),
            direct_url: item.direct_url.clone(),
            local_relative_path: ctx.root_path(item),
            materials,
            zoom,
            priority_hint: self.priority(participation, &span, today),
            task_bundle_relative_path: task_document_path(&span, ctx.course, kind, &item.id, &item.title),
            instructions: item.description.clone(),
        };

        // Prep reminders hang off the real due date only
        let due = item
            .due_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|ts| ts.local_date(self.basis));

        if let Some(due) = due {
            let offset = match kind {
                TaskKind::Quiz => self.settings.quiz_prep_days,
                _ => self.settings.assignment_prep_days,
            };
            let prep_date = prep_date(due, offset, today, self.settings.lookback_days);
            let prep_span = WeekSpan::containing(prep_date);
            let prep_id = format!("{}-prep", item.id);
            let prep_title = format!("Prep: {}", item.title);

            let prep = TaskBundleEntry {
                kind: TaskKind::Prep,
                id: prep_id.clone(),
                week: prep_span.key,
                scheduled_date: prep_date,
                prep_for: Some(item.id.clone()),
                priority_hint: self.priority(participation, &prep_span, today),
                task_bundle_relative_path: task_document_path(
                    &prep_span,
                    ctx.course,
                    TaskKind::Prep,
                    &prep_id,
                    &prep_title,
                ),
                title: prep_title,
                ..entry.clone()
            };
            acc.week(prep_span).items.push(prep);
        }

        acc.week(span).items.push(entry);
    }

    /// Linked resources first, then same-module resources
    fn materials(&self, ctx: &CourseContext<'_>, item: &Item) -> Vec<MaterialRef> {
        let mut set = MaterialSet::default();

        // The item never lists itself
        if let Some(path) = ctx.root_path(item) {
            set.seen.insert(path);
        }
        if let Some(url) = item.direct_url.as_deref() {
            set.seen.insert(normalize_url(url));
        }

        for link in &item.links {
            match self.resolve_link(ctx, &link.url) {
                Some(target) if target.key() == item.key() => {}
                Some(target) => set.push(ctx.material(target, MaterialSource::Link)),
                None if is_http(&link.url) => set.push(MaterialRef {
                    title: if link.label.trim().is_empty() {
                        link.url.clone()
                    } else {
                        link.label.trim().to_string()
                    },
                    source: MaterialSource::Link,
                    kind: None,
                    url: Some(link.url.clone()),
                    local_relative_path: None,
                }),
                None => {}
            }
        }

        for sibling in ctx.siblings(item) {
            set.push(ctx.material(sibling, MaterialSource::Module));
        }

        set.items
    }

    fn resolve_link<'a>(&self, ctx: &CourseContext<'a>, url: &str) -> Option<&'a Item> {
        if let Some(item) = ctx.by_url.get(&normalize_url(url)) {
            return Some(*item);
        }
        let captures = self.file_ref.captures(url)?;
        ctx.files_by_id.get(captures.get(1)?.as_str()).copied()
    }

    fn zoom_links(&self, ctx: &CourseContext<'_>, item: &Item, materials: &[MaterialRef]) -> Vec<String> {
        let sibling_links = ctx.siblings(item).into_iter().flat_map(|s| s.links.iter());
        let candidates = item
            .links
            .iter()
            .chain(sibling_links)
            .map(|link| link.url.as_str())
            .chain(item.direct_url.as_deref())
            .chain(materials.iter().filter_map(|m| m.url.as_deref()));

        let mut seen = HashSet::new();
        candidates
            .filter(|url| self.zoom.is_zoom(url))
            .filter(|url| seen.insert(url.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Discussion-style or ungraded work
    fn is_participation(&self, item: &Item) -> bool {
        let title = item.title.to_lowercase();
        self.settings
            .participation_keywords
            .iter()
            .any(|keyword| title.contains(&keyword.to_lowercase()))
            || item.submission_types().contains(&"discussion_topic")
            || item.points_possible() == Some(0.0)
    }

    fn priority(&self, participation: bool, span: &WeekSpan, today: NaiveDate) -> PriorityHint {
        if participation {
            return PriorityHint::Low;
        }
        let current = WeekSpan::containing(today);
        if span.start_date == current.start_date || span.start_date == current.end_date {
            PriorityHint::High
        } else {
            PriorityHint::Medium
        }
    }
}

/// Date of a prep reminder.
///
/// `offset_days` before the due date, but never earlier than
/// `today - lookback_days` and never later than the due date itself.
pub fn prep_date(due: NaiveDate, offset_days: i64, today: NaiveDate, lookback_days: i64) -> NaiveDate {
    let earliest = (today - Duration::days(lookback_days)).min(due);
    (due - Duration::days(offset_days)).max(earliest)
}

/// Canonical form of a URL for matching and dedup
///
/// Query and fragment are dropped, then case and trailing slashes.
pub fn normalize_url(url: &str) -> String {
    let raw = url.trim();
    let canonical = match Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    };
    canonical.trim_end_matches('/').to_lowercase()
}

fn is_http(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// `<week folder>/tasks/<file>.md`, relative to the weekly directory
fn task_document_path(span: &WeekSpan, course: &CourseRef, kind: TaskKind, id: &str, title: &str) -> String {
    let file = sanitize_filename(&format!("{}_{}_{} {}", course.id, kind, id, title));
    format!("{}/{}/{}.md", span.folder_name(), TASKS_DIR, file)
}

/// Lookup tables for one course's manifest
struct CourseContext<'a> {
    course: &'a CourseRef,
    course_dir: String,
    module_dir: &'a str,
    by_url: HashMap<String, &'a Item>,
    files_by_id: HashMap<&'a str, &'a Item>,
    /// Non-task items in manifest order
    resources: Vec<&'a Item>,
}

impl<'a> CourseContext<'a> {
    fn new(manifest: &'a Manifest, module_dir: &'a str) -> Self {
        let mut by_url = HashMap::new();
        let mut files_by_id = HashMap::new();
        let mut resources = Vec::new();

        for item in manifest.items.iter() {
            if let Some(url) = item.direct_url.as_deref() {
                by_url.entry(normalize_url(url)).or_insert(item);
            }
            if item.kind == ItemKind::File {
                files_by_id.entry(item.id.as_str()).or_insert(item);
            }
            if !item.kind.is_task() {
                resources.push(item);
            }
        }

        Self {
            course: &manifest.course,
            course_dir: manifest.course.dir_name(),
            module_dir,
            by_url,
            files_by_id,
            resources,
        }
    }

    /// Stored path made relative to the download root
    fn root_path(&self, item: &Item) -> Option<String> {
        item.stored_path()
            .map(|path| format!("{}/{}", self.course_dir, path.trim_start_matches('/')))
    }

    /// `modules/<module>/` for items that live in (or belong to) a module
    fn module_prefix(&self, item: &Item) -> Option<String> {
        if let Some(path) = item.stored_path() {
            let mut parts = path.trim_start_matches('/').split('/');
            if let (Some(root), Some(module), Some(_)) = (parts.next(), parts.next(), parts.next()) {
                if root == self.module_dir && !module.is_empty() {
                    return Some(format!("{}/{}/", root, module));
                }
            }
        }
        item.module_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| format!("{}/{}/", self.module_dir, sanitize_filename(name)))
    }

    /// Resources stored under the same module folder as `item`
    fn siblings(&self, item: &Item) -> Vec<&'a Item> {
        let Some(prefix) = self.module_prefix(item) else {
            return Vec::new();
        };
        let own = item.key();
        self.resources
            .iter()
            .copied()
            .filter(|r| r.key() != own)
            .filter(|r| {
                r.stored_path()
                    .is_some_and(|p| p.trim_start_matches('/').starts_with(&prefix))
            })
            .collect()
    }

    fn material(&self, item: &Item, source: MaterialSource) -> MaterialRef {
        MaterialRef {
            title: item.title.clone(),
            source,
            kind: Some(item.kind),
            url: item.direct_url.clone(),
            local_relative_path: self.root_path(item),
        }
    }

    fn unscheduled(&self, item: &Item, reason: UnscheduledReason, raw_date: Option<String>) -> UnscheduledEntry {
        UnscheduledEntry {
            course: self.course.clone(),
            kind: item.kind,
            id: item.id.clone(),
            title: item.title.clone(),
            reason,
            raw_date,
            direct_url: item.direct_url.clone(),
            local_relative_path: self.root_path(item),
        }
    }
}

/// Materials deduplicated by path, else normalized URL, in first-seen order
#[derive(Default)]
struct MaterialSet {
    seen: HashSet<String>,
    items: Vec<MaterialRef>,
}

impl MaterialSet {
    fn push(&mut self, material: MaterialRef) {
        let keys: Vec<String> = material
            .local_relative_path
            .iter()
            .cloned()
            .chain(material.url.as_deref().map(normalize_url))
            .collect();

        if keys.is_empty() || keys.iter().any(|key| self.seen.contains(key)) {
            return;
        }
        self.seen.extend(keys);
        self.items.push(material);
    }
}

#[derive(Default)]
struct Accumulator {
    weeks: BTreeMap<WeekKey, Week>,
    unscheduled: Vec<UnscheduledEntry>,
}

impl Accumulator {
    fn week(&mut self, span: WeekSpan) -> &mut Week {
        self.weeks.entry(span.key).or_insert_with(|| Week {
            week: span,
            items: Vec::new(),
            resources: Vec::new(),
        })
    }

    fn finish(self, today: NaiveDate) -> BundleOutput {
        let mut weeks: Vec<Week> = self.weeks.into_values().collect();
        for week in &mut weeks {
            week.items.sort_by(|a, b| {
                (a.scheduled_date, &a.course.id, a.kind, &a.id)
                    .cmp(&(b.scheduled_date, &b.course.id, b.kind, &b.id))
            });
            week.resources.sort_by(|a, b| {
                (a.scheduled_date, &a.course.id, a.kind, &a.id)
                    .cmp(&(b.scheduled_date, &b.course.id, b.kind, &b.id))
            });
        }

        let index = WeekIndex {
            today,
            weeks: weeks
                .iter()
                .map(|w| IndexEntry {
                    key: w.week.key,
                    start_date: w.week.start_date,
                    end_date: w.week.end_date,
                    folder: w.week.folder_name(),
                    released: w.week.is_released(today),
                    tasks: w.items.len(),
                    resources: w.resources.len(),
                })
                .collect(),
        };

        let all_items = AllItems {
            tasks: weeks.iter().flat_map(|w| w.items.iter().cloned()).collect(),
            resources: weeks.iter().flat_map(|w| w.resources.iter().cloned()).collect(),
        };

        BundleOutput {
            today,
            weeks,
            index,
            all_items,
            unscheduled: Unscheduled {
                items: self.unscheduled,
            },
        }
    }
}

/// Load every course manifest under the download root.
///
/// Unreadable manifests are skipped with a warning.
pub async fn load_manifests(layout: &Layout, course_filter: Option<&str>) -> Result<Vec<Manifest>> {
    let pattern = layout.manifest_glob();
    let mut manifests = Vec::new();

    for entry in glob::glob(&pattern).context("Invalid manifest glob")? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable manifest path");
                continue;
            }
        };

        match Manifest::load(&path).await {
            Ok(Some(manifest)) if manifest.version != MANIFEST_VERSION => {
                warn!(path = %path.display(), version = manifest.version, "Skipping manifest with unsupported version");
            }
            Ok(Some(manifest)) => {
                if course_filter.map_or(true, |f| manifest.course.matches_filter(f)) {
                    manifests.push(manifest);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupt manifest"),
        }
    }

    manifests.sort_by(|a, b| a.course.cmp(&b.course));
    Ok(manifests)
}
