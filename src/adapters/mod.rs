//! Adapter interfaces for external systems.
//!
//! The sync engine talks to the LMS and to the local disk only through the
//! traits defined here, so both can be swapped out (the tests use in-memory
//! fakes).

pub mod canvas;
pub mod html;
pub mod materializer;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{CourseRef, Item, ItemKind};

// Re-export the concrete adapters
pub use canvas::{CanvasAuth, CanvasFetcher, FetchError};
pub use html::{Extracted, HtmlExtractor};
pub use materializer::LocalMaterializer;

/// Source of course content
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Courses the user is enrolled in
    async fn list_courses(&self) -> Result<Vec<CourseRef>>;

    /// Current items of one kind for a course
    async fn list_items(&self, course_id: &str, kind: ItemKind) -> Result<Vec<Item>>;
}

/// Download of a binary attachment
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Writes fetched items somewhere readable
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Persist an item and return its path relative to the course directory
    async fn write_item(&self, course: &CourseRef, item: &Item) -> Result<String>;

    /// Whether a previously stored item has disappeared from disk
    fn is_missing(&self, _course: &CourseRef, _item: &Item) -> bool {
        false
    }
}
