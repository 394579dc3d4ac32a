//! Canonical on-disk layout.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Layout
//!
//! ```text
//! <download_dir>/
//! ├── <course dir>/
//! │   ├── _sync_state.json      # Registry (owned by the course's sync run)
//! │   ├── _manifest.json        # Manifest (derived)
//! │   └── assignments/ quizzes/ pages/ modules/<module>/ ...
//! └── _weekly/
//!     ├── _index.json
//!     ├── _all_items.json
//!     ├── _unscheduled.json
//!     └── 2026-W04_2026-01-19/
//!         ├── week.json
//!         └── tasks/*.md
//!
//! <home>/
//! ├── sync.lock                 # single sync process per machine
//! └── sync_log.jsonl            # run log
//! ```

use std::path::{Path, PathBuf};

use crate::domain::{CourseRef, WeekSpan};

use super::ResolvedConfig;

pub const REGISTRY_FILE: &str = "_sync_state.json";
pub const MANIFEST_FILE: &str = "_manifest.json";
pub const WEEKLY_DIR: &str = "_weekly";
pub const INDEX_FILE: &str = "_index.json";
pub const ALL_ITEMS_FILE: &str = "_all_items.json";
pub const UNSCHEDULED_FILE: &str = "_unscheduled.json";
pub const WEEK_FILE: &str = "week.json";
pub const TASKS_DIR: &str = "tasks";
pub const LOCK_FILE: &str = "sync.lock";
pub const SYNC_LOG_FILE: &str = "sync_log.jsonl";

const MAX_FILENAME_LEN: usize = 100;

/// Resolved locations for one download root and state home
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    home: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(&config.download_dir, &config.home)
    }

    /// Root of the synced course tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn course_dir(&self, course: &CourseRef) -> PathBuf {
        self.root.join(course.dir_name())
    }

    pub fn registry_path(&self, course: &CourseRef) -> PathBuf {
        self.course_dir(course).join(REGISTRY_FILE)
    }

    pub fn manifest_path(&self, course: &CourseRef) -> PathBuf {
        self.course_dir(course).join(MANIFEST_FILE)
    }

    /// Glob matching every course manifest under the root
    pub fn manifest_glob(&self) -> String {
        self.course_glob(MANIFEST_FILE)
    }

    /// Glob matching every course registry under the root
    pub fn registry_glob(&self) -> String {
        self.course_glob(REGISTRY_FILE)
    }

    fn course_glob(&self, file: &str) -> String {
        let escaped = glob::Pattern::escape(&self.root.to_string_lossy());
        format!("{}/*/{}", escaped, file)
    }

    pub fn weekly_dir(&self) -> PathBuf {
        self.root.join(WEEKLY_DIR)
    }

    pub fn week_dir(&self, span: &WeekSpan) -> PathBuf {
        self.weekly_dir().join(span.folder_name())
    }

    pub fn week_file(&self, span: &WeekSpan) -> PathBuf {
        self.week_dir(span).join(WEEK_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.weekly_dir().join(INDEX_FILE)
    }

    pub fn all_items_path(&self) -> PathBuf {
        self.weekly_dir().join(ALL_ITEMS_FILE)
    }

    pub fn unscheduled_path(&self) -> PathBuf {
        self.weekly_dir().join(UNSCHEDULED_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home.join(LOCK_FILE)
    }

    pub fn sync_log_path(&self) -> PathBuf {
        self.home.join(SYNC_LOG_FILE)
    }
}

/// Make a string safe for use as a file or folder name.
///
/// Replaces `<>:"/\|?*` with `_`, collapses whitespace, trims dots and
/// spaces, and caps the length.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() && !c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    let capped = capped.trim_end_matches(|c| c == '.' || c == ' ');

    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Week 3: Reading / Notes?"), "Week 3_ Reading _ Notes_");
        assert_eq!(sanitize_filename("  lots   of\tspace  "), "lots of space");
        assert_eq!(sanitize_filename("Line one\r\nLine two"), "Line one Line two");
        assert_eq!(sanitize_filename("bell\u{7}"), "bell_");
        assert_eq!(sanitize_filename("...hidden..."), "hidden");
        assert_eq!(sanitize_filename("***"), "___");
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), 100);
    }

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/drive/Canvas", "/home/me/.studysync");
        let course = CourseRef::new("1", "FDNT 10");

        assert_eq!(
            layout.registry_path(&course),
            PathBuf::from("/drive/Canvas/FDNT 10/_sync_state.json")
        );
        assert_eq!(
            layout.manifest_glob(),
            "/drive/Canvas/*/_manifest.json".to_string()
        );

        let span = WeekSpan::containing(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap());
        assert_eq!(
            layout.week_file(&span),
            PathBuf::from("/drive/Canvas/_weekly/2026-W04_2026-01-19/week.json")
        );
        assert_eq!(
            layout.lock_path(),
            PathBuf::from("/home/me/.studysync/sync.lock")
        );
    }
}
