//! Local materializer.
//!
//! Writes each fetched item into the course directory as a readable text
//! document (or, for attachments, the downloaded file itself). Existing
//! files are overwritten in place; nothing is ever deleted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::paths::sanitize_filename;
use crate::core::persist;
use crate::domain::{CourseRef, Item, ItemKind};

use super::{FileSource, Materializer};

const RULE: &str = "============================================================";
const SUBRULE: &str = "----------------------------------------";

/// Materializer writing under a download root
pub struct LocalMaterializer {
    root: PathBuf,
    module_dir: String,
    files: Option<Arc<dyn FileSource>>,
}

impl LocalMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            module_dir: "modules".to_string(),
            files: None,
        }
    }

    /// Folder name used for module items
    pub fn with_module_dir(mut self, module_dir: impl Into<String>) -> Self {
        self.module_dir = module_dir.into();
        self
    }

    /// Enable attachment downloads
    pub fn with_file_source(mut self, source: Arc<dyn FileSource>) -> Self {
        self.files = Some(source);
        self
    }

    fn course_dir(&self, course: &CourseRef) -> PathBuf {
        self.root.join(course.dir_name())
    }

    /// Where an item is written, relative to the course directory.
    ///
    /// A stored path is kept while it still matches the title. Otherwise the
    /// title-based path is used, tagged with the item id when another file
    /// already occupies it.
    pub fn target_path(&self, course: &CourseRef, item: &Item) -> String {
        let plain = self.relative_path(item);
        let tagged = tag_with_id(&plain, &item.id);

        if let Some(stored) = item.stored_path() {
            if stored == plain || stored == tagged {
                return stored.to_string();
            }
        }
        if self.course_dir(course).join(&plain).exists() {
            tagged
        } else {
            plain
        }
    }

    /// Title-based path of an item's document, relative to the course directory
    pub fn relative_path(&self, item: &Item) -> String {
        let name = sanitize_filename(&item.title);
        match item.kind {
            ItemKind::ModuleItem => {
                let module = item
                    .module_name()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| "Ungrouped".to_string());
                format!("{}/{}/{}.txt", self.module_dir, module, name)
            }
            ItemKind::File => match self.download_url(item) {
                Some(_) => {
                    let file = item
                        .extra
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .map(sanitize_filename)
                        .unwrap_or(name);
                    format!("{}/{}", item.kind.folder(), file)
                }
                None => format!("{}/{}.txt", item.kind.folder(), name),
            },
            kind => format!("{}/{}.txt", kind.folder(), name),
        }
    }

    fn download_url<'a>(&self, item: &'a Item) -> Option<&'a str> {
        self.files.as_ref()?;
        item.extra
            .get("download_url")
            .and_then(|v| v.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[async_trait]
impl Materializer for LocalMaterializer {
    async fn write_item(&self, course: &CourseRef, item: &Item) -> Result<String> {
        let relative = self.target_path(course, item);
        let path = self.course_dir(course).join(&relative);

        match (self.files.as_ref(), self.download_url(item)) {
            (Some(files), Some(url)) => {
                let bytes = files
                    .download(url)
                    .await
                    .with_context(|| format!("Failed to download {}", item.title))?;
                persist::write_atomic(&path, bytes).await?;
            }
            _ => {
                persist::write_atomic(&path, render_text_document(item)).await?;
            }
        }

        debug!(course = %course.name, path = %relative, "Materialized item");
        Ok(relative)
    }

    fn is_missing(&self, course: &CourseRef, item: &Item) -> bool {
        let Some(stored) = item.stored_path() else {
            return false;
        };
        let missing = !self.course_dir(course).join(stored).exists();
        if missing {
            warn!(course = %course.name, path = stored, "Stored file missing, will re-download");
        }
        missing
    }
}

/// `dir/Notes.txt` → `dir/Notes (11).txt`
fn tag_with_id(relative: &str, id: &str) -> String {
    let (dir, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, relative),
    };
    let tag = sanitize_filename(id);
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, tag, ext),
        _ => format!("{} ({})", file, tag),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

/// Readable plain-text rendition of an item
pub fn render_text_document(item: &Item) -> String {
    let mut lines = vec![
        RULE.to_string(),
        format!("{}: {}", item.kind.as_str().replace('_', " ").to_uppercase(), item.title.to_uppercase()),
        RULE.to_string(),
    ];

    if let Some(due) = &item.due_at {
        lines.push(format!("Due: {}", due));
    }
    if let Some(unlock) = &item.unlock_at {
        lines.push(format!("Available: {}", unlock));
    }
    if let Some(points) = item.points_possible() {
        lines.push(format!("Points: {}", points));
    }
    let submission = item.submission_types();
    if !submission.is_empty() {
        lines.push(format!("Submission: {}", submission.join(", ")));
    }
    if let Some(module) = item.module_name() {
        lines.push(format!("Module: {}", module));
    }
    if let Some(url) = &item.direct_url {
        lines.push(format!("Canvas: {}", url));
    }

    lines.push(String::new());
    lines.push(SUBRULE.to_string());
    lines.push(String::new());
    match item.description.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => lines.push(text.to_string()),
        _ => lines.push("(No description provided)".to_string()),
    }

    if !item.links.is_empty() {
        lines.push(String::new());
        lines.push(SUBRULE.to_string());
        lines.push("LINKS:".to_string());
        for link in &item.links {
            if link.label.is_empty() {
                lines.push(format!("  • {}", link.url));
            } else {
                lines.push(format!("  • {} ({})", link.url, link.label));
            }
        }
    }

    let mut doc = lines.join("\n");
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeFiles {
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FileSource for FakeFiles {
        async fn download(&self, url: &str) -> Result<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(b"%PDF-1.4".to_vec())
        }
    }

    fn course() -> CourseRef {
        CourseRef::new("1", "FDNT 10")
    }

    #[tokio::test]
    async fn test_writes_text_documents_by_kind() {
        let temp = TempDir::new().unwrap();
        let materializer = LocalMaterializer::new(temp.path());

        let item = Item::new("5", ItemKind::Assignment, "Essay 1: Diet?")
            .with_due_at("2026-01-26T07:59:00Z")
            .with_description("Write 500 words.")
            .with_link("https://www.myplate.gov/", "MyPlate")
            .with_extra("points_possible", 20.0);

        let path = materializer.write_item(&course(), &item).await.unwrap();
        assert_eq!(path, "assignments/Essay 1_ Diet_.txt");

        let content = std::fs::read_to_string(temp.path().join("FDNT 10").join(&path)).unwrap();
        assert!(content.contains("ASSIGNMENT: ESSAY 1: DIET?"));
        assert!(content.contains("Points: 20"));
        assert!(content.contains("  • https://www.myplate.gov/ (MyPlate)"));
    }

    #[tokio::test]
    async fn test_module_items_go_under_module_folder() {
        let temp = TempDir::new().unwrap();
        let materializer = LocalMaterializer::new(temp.path());
        let item = Item::new("20", ItemKind::ModuleItem, "Lecture slides")
            .with_extra("module_name", "Week 3: Digestion");

        let path = materializer.write_item(&course(), &item).await.unwrap();
        assert_eq!(path, "modules/Week 3_ Digestion/Lecture slides.txt");
    }

    #[tokio::test]
    async fn test_downloads_attachments_when_source_present() {
        let temp = TempDir::new().unwrap();
        let files = Arc::new(FakeFiles {
            requested: Mutex::new(Vec::new()),
        });
        let materializer = LocalMaterializer::new(temp.path()).with_file_source(files.clone());

        let item = Item::new("55", ItemKind::File, "Rubric")
            .with_extra("filename", "rubric.pdf")
            .with_extra("download_url", "https://canvas.example.edu/files/55/download");

        let path = materializer.write_item(&course(), &item).await.unwrap();
        assert_eq!(path, "files/rubric.pdf");
        assert_eq!(
            std::fs::read(temp.path().join("FDNT 10/files/rubric.pdf")).unwrap(),
            b"%PDF-1.4"
        );
        assert_eq!(files.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_title_items_get_distinct_files() {
        let temp = TempDir::new().unwrap();
        let materializer = LocalMaterializer::new(temp.path());
        let first = Item::new("10", ItemKind::Page, "Notes").with_description("FIRST");
        let second = Item::new("11", ItemKind::Page, "Notes").with_description("SECOND");

        let path_a = materializer.write_item(&course(), &first).await.unwrap();
        let path_b = materializer.write_item(&course(), &second).await.unwrap();
        assert_eq!(path_a, "pages/Notes.txt");
        assert_eq!(path_b, "pages/Notes (11).txt");

        let dir = temp.path().join("FDNT 10");
        assert!(std::fs::read_to_string(dir.join(&path_a)).unwrap().contains("FIRST"));
        assert!(std::fs::read_to_string(dir.join(&path_b)).unwrap().contains("SECOND"));

        // Later writes stay on the recorded paths
        let again_a = materializer
            .write_item(&course(), &first.clone().with_path(path_a.clone()))
            .await
            .unwrap();
        let again_b = materializer
            .write_item(&course(), &second.clone().with_path(path_b.clone()))
            .await
            .unwrap();
        assert_eq!((again_a, again_b), (path_a, path_b));
    }

    #[test]
    fn test_tag_with_id() {
        assert_eq!(tag_with_id("files/rubric.pdf", "55"), "files/rubric (55).pdf");
        assert_eq!(tag_with_id("modules/Week 3/Slides.txt", "20"), "modules/Week 3/Slides (20).txt");
        assert_eq!(tag_with_id("files/README", "9"), "files/README (9)");
    }

    #[tokio::test]
    async fn test_is_missing_checks_stored_path() {
        let temp = TempDir::new().unwrap();
        let materializer = LocalMaterializer::new(temp.path());
        let item = Item::new("7", ItemKind::Page, "Welcome");

        assert!(!materializer.is_missing(&course(), &item));

        let stored = item.clone().with_path("pages/Welcome.txt");
        assert!(materializer.is_missing(&course(), &stored));

        materializer.write_item(&course(), &item).await.unwrap();
        assert!(!materializer.is_missing(&course(), &stored));
    }
}
