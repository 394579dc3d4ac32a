//! Canvas LMS REST adapter.
//!
//! Reads courses and content through `/api/v1`, authenticating with either
//! an API token or the cookies of a saved browser session. Listings follow
//! `Link: <...>; rel="next"` pagination. Transient failures (network errors,
//! 429, 5xx) are retried with exponential backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, COOKIE, LINK};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CanvasSettings;
use crate::domain::{CourseRef, Item, ItemKind, Link};

use super::html::HtmlExtractor;
use super::{Fetcher, FileSource};

const PER_PAGE: &str = "100";
const BASE_BACKOFF_MS: u64 = 500;

/// Errors from the Canvas adapter
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no Canvas URL configured (set CANVAS_URL or canvas.base_url)")]
    NotConfigured,

    #[error("no Canvas credentials: set CANVAS_TOKEN or save a session to {}", .0.display())]
    MissingCredentials(PathBuf),

    #[error("failed to read session file {}: {reason}", .path.display())]
    BadSession { path: PathBuf, reason: String },

    #[error("Canvas rejected the credentials ({status}); refresh the token or session")]
    Unauthorized { status: StatusCode },

    #[error("Canvas returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Worth another attempt after a pause
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasAuth {
    /// Personal access token sent as a bearer header
    Token(String),
    /// `Cookie` header value rebuilt from a saved browser session
    Cookies(String),
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    #[serde(default)]
    cookies: Vec<SessionCookie>,
}

#[derive(Debug, Deserialize)]
struct SessionCookie {
    name: String,
    value: String,
}

impl CanvasAuth {
    /// Token when configured, otherwise the saved session's cookies
    pub fn from_settings(settings: &CanvasSettings) -> Result<Self, FetchError> {
        match settings.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(CanvasAuth::Token(token.to_string())),
            _ => Self::from_session_file(&settings.session_file),
        }
    }

    /// Parse a browser storage-state file (`{"cookies": [{"name", "value"}, ...]}`)
    pub fn from_session_file(path: &Path) -> Result<Self, FetchError> {
        if !path.exists() {
            return Err(FetchError::MissingCredentials(path.to_path_buf()));
        }
        let bad = |reason: String| FetchError::BadSession {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| bad(e.to_string()))?;
        let session: SessionFile = serde_json::from_str(&content).map_err(|e| bad(e.to_string()))?;
        if session.cookies.is_empty() {
            return Err(bad("no cookies saved".to_string()));
        }

        let header = session
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(CanvasAuth::Cookies(header))
    }
}

/// Canvas REST client
#[derive(Clone)]
pub struct CanvasFetcher {
    client: reqwest::Client,
    base_url: String,
    auth: CanvasAuth,
    retry_attempts: u32,
    html: HtmlExtractor,
}

impl CanvasFetcher {
    pub fn new(base_url: impl Into<String>, auth: CanvasAuth) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            retry_attempts: 3,
            html: HtmlExtractor::new()?,
        })
    }

    /// Create from resolved config
    pub fn from_settings(settings: &CanvasSettings) -> Result<Self> {
        let base_url = settings.base_url.clone().ok_or(FetchError::NotConfigured)?;
        let auth = CanvasAuth::from_settings(settings)?;
        Ok(Self::new(base_url, auth)?.with_retry_attempts(settings.retry_attempts))
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Response, FetchError> {
        let request = self
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, "application/json");
        let request = match &self.auth {
            CanvasAuth::Token(token) => request.bearer_auth(token),
            CanvasAuth::Cookies(cookies) => request.header(COOKIE, cookies),
        };

        let response = request.send().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized { status });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<Response, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(url, query).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                    warn!(url, attempt, error = %e, "Canvas request failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every element of a paginated listing
    async fn get_paginated(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, FetchError> {
        let mut first_query: Vec<(&str, String)> = query.to_vec();
        first_query.push(("per_page", PER_PAGE.to_string()));

        let mut results = Vec::new();
        let mut next = Some(self.api_url(path));
        let mut page = 0;

        while let Some(url) = next.take() {
            // Next links already carry the query string
            let query: &[(&str, String)] = if page == 0 { &first_query } else { &[] };
            let response = self.get_with_retry(&url, query).await?;
            next = next_link(response.headers());

            let body: Value = response
                .json()
                .await
                .map_err(|source| FetchError::Decode { url: url.clone(), source })?;
            match body {
                Value::Array(items) => results.extend(items),
                other => results.push(other),
            }
            page += 1;
        }

        debug!(path, pages = page, count = results.len(), "Fetched listing");
        Ok(results)
    }

    /// Text and links of an HTML body; relative links resolve against the item's page
    fn extract(&self, html: Option<&str>, page_url: Option<&str>) -> (Option<String>, Vec<Link>) {
        match html.map(str::trim).filter(|h| !h.is_empty()) {
            Some(html) => {
                let base = page_url
                    .map(String::from)
                    .unwrap_or_else(|| format!("{}/", self.base_url));
                let extracted = self.html.extract(html, Some(&base));
                let text = (!extracted.text.is_empty()).then_some(extracted.text);
                (text, extracted.links)
            }
            None => (None, Vec::new()),
        }
    }

    fn course_url(&self, course_id: &str, rest: &str) -> String {
        format!("{}/courses/{}/{}", self.base_url, course_id, rest)
    }

    async fn assignments(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(&format!("/courses/{}/assignments", course_id), &[])
            .await?;

        Ok(raw
            .iter()
            // Quiz-backed assignments are listed again as quizzes
            .filter(|a| !a.get("is_quiz_assignment").and_then(Value::as_bool).unwrap_or(false))
            .map(|a| {
                let body = str_field(a, "description");
                let (description, links) = self.extract(body, str_field(a, "html_url"));
                let mut item = Item::new(id_field(a, "id"), ItemKind::Assignment, text_field(a, "name"));
                item.due_at = str_field(a, "due_at").map(String::from);
                item.unlock_at = str_field(a, "unlock_at").map(String::from);
                item.updated_at = str_field(a, "updated_at").map(String::from);
                item.direct_url = str_field(a, "html_url").map(String::from);
                item.content_hash = Some(hash_content(body.unwrap_or_default()));
                item.description = description;
                item.links = links;
                copy_fields(a, &mut item, &["points_possible", "submission_types", "lock_at"]);
                item
            })
            .collect())
    }

    async fn quizzes(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(&format!("/courses/{}/quizzes", course_id), &[])
            .await?;

        Ok(raw
            .iter()
            .map(|q| {
                let body = str_field(q, "description");
                let (description, links) = self.extract(body, str_field(q, "html_url"));
                let mut item = Item::new(id_field(q, "id"), ItemKind::Quiz, text_field(q, "title"));
                item.due_at = str_field(q, "due_at").map(String::from);
                item.unlock_at = str_field(q, "unlock_at").map(String::from);
                item.updated_at = str_field(q, "updated_at").map(String::from);
                item.direct_url = str_field(q, "html_url").map(String::from);
                item.content_hash = Some(hash_content(&format!(
                    "{}|{}|{}",
                    body.unwrap_or_default(),
                    str_field(q, "due_at").unwrap_or_default(),
                    q.get("question_count").cloned().unwrap_or(Value::Null)
                )));
                item.description = description;
                item.links = links;
                copy_fields(q, &mut item, &["points_possible", "question_count", "time_limit", "quiz_type"]);
                item
            })
            .collect())
    }

    async fn pages(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(
                &format!("/courses/{}/pages", course_id),
                &[("include[]", "body".to_string())],
            )
            .await?;

        Ok(raw
            .iter()
            .map(|p| {
                let id = match id_field(p, "page_id") {
                    id if id.is_empty() => text_field(p, "url"),
                    id => id,
                };
                let body = str_field(p, "body");
                let (description, links) = self.extract(body, str_field(p, "html_url"));
                let mut item = Item::new(id, ItemKind::Page, text_field(p, "title"));
                item.updated_at = str_field(p, "updated_at").map(String::from);
                item.direct_url = str_field(p, "html_url")
                    .map(String::from)
                    .or_else(|| str_field(p, "url").map(|slug| self.course_url(course_id, &format!("pages/{}", slug))));
                item.content_hash = Some(hash_content(body.unwrap_or_default()));
                item.description = description;
                item.links = links;
                copy_fields(p, &mut item, &["url", "front_page"]);
                item
            })
            .collect())
    }

    async fn announcements(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(
                "/announcements",
                &[("context_codes[]", format!("course_{}", course_id))],
            )
            .await?;

        Ok(raw
            .iter()
            .map(|a| {
                let body = str_field(a, "message");
                let (description, links) = self.extract(body, str_field(a, "html_url"));
                let posted = str_field(a, "delayed_post_at").or_else(|| str_field(a, "posted_at"));
                let mut item = Item::new(id_field(a, "id"), ItemKind::Announcement, text_field(a, "title"));
                item.unlock_at = posted.map(String::from);
                item.updated_at = str_field(a, "last_reply_at")
                    .or_else(|| str_field(a, "posted_at"))
                    .map(String::from);
                item.direct_url = str_field(a, "html_url").map(String::from);
                item.content_hash = Some(hash_content(body.unwrap_or_default()));
                item.description = description;
                item.links = links;
                copy_fields(a, &mut item, &["posted_at", "author"]);
                item
            })
            .collect())
    }

    async fn files(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(&format!("/courses/{}/files", course_id), &[])
            .await?;

        Ok(raw
            .iter()
            .map(|f| {
                let id = id_field(f, "id");
                let title = str_field(f, "display_name")
                    .or_else(|| str_field(f, "filename"))
                    .unwrap_or("untitled")
                    .to_string();
                let mut item = Item::new(id.clone(), ItemKind::File, title);
                item.unlock_at = str_field(f, "unlock_at").map(String::from);
                item.updated_at = str_field(f, "updated_at")
                    .or_else(|| str_field(f, "modified_at"))
                    .map(String::from);
                item.direct_url = Some(self.course_url(course_id, &format!("files/{}", id)));
                item.content_hash = Some(hash_content(&format!(
                    "{}|{}",
                    f.get("size").cloned().unwrap_or(Value::Null),
                    str_field(f, "modified_at").unwrap_or_default()
                )));
                if let Some(url) = str_field(f, "url") {
                    item.extra.insert("download_url".to_string(), Value::String(url.to_string()));
                }
                copy_fields(f, &mut item, &["filename", "size", "content-type"]);
                item
            })
            .collect())
    }

    async fn discussions(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let raw = self
            .get_paginated(&format!("/courses/{}/discussion_topics", course_id), &[])
            .await?;

        Ok(raw
            .iter()
            .map(|d| {
                let body = str_field(d, "message");
                let (description, links) = self.extract(body, str_field(d, "html_url"));
                let mut item = Item::new(id_field(d, "id"), ItemKind::Discussion, text_field(d, "title"));
                item.due_at = d
                    .get("assignment")
                    .and_then(|a| str_field(a, "due_at"))
                    .map(String::from);
                item.unlock_at = str_field(d, "delayed_post_at").map(String::from);
                item.updated_at = str_field(d, "last_reply_at")
                    .or_else(|| str_field(d, "posted_at"))
                    .map(String::from);
                item.direct_url = str_field(d, "html_url").map(String::from);
                item.content_hash = Some(hash_content(body.unwrap_or_default()));
                item.description = description;
                item.links = links;
                copy_fields(d, &mut item, &["discussion_subentry_count", "assignment_id"]);
                item
            })
            .collect())
    }

    async fn module_items(&self, course_id: &str) -> Result<Vec<Item>, FetchError> {
        let modules = self
            .get_paginated(
                &format!("/courses/{}/modules", course_id),
                &[("include[]", "items".to_string())],
            )
            .await?;

        let mut items = Vec::new();
        for module in &modules {
            let module_id = id_field(module, "id");
            let module_name = text_field(module, "name");

            // Large modules omit inline items
            let entries = match module.get("items").and_then(Value::as_array) {
                Some(entries) => entries.clone(),
                None => {
                    self.get_paginated(&format!("/courses/{}/modules/{}/items", course_id, module_id), &[])
                        .await?
                }
            };

            for entry in &entries {
                let module_type = text_field(entry, "type");
                if module_type.eq_ignore_ascii_case("SubHeader") {
                    continue;
                }

                let external = str_field(entry, "external_url");
                let mut item = Item::new(id_field(entry, "id"), ItemKind::ModuleItem, text_field(entry, "title"));
                item.direct_url = external
                    .or_else(|| str_field(entry, "html_url"))
                    .map(String::from);
                if let Some(url) = external {
                    item.links.push(Link::new(url, text_field(entry, "title")));
                }
                if let Some(details) = entry.get("content_details") {
                    item.due_at = str_field(details, "due_at").map(String::from);
                    item.unlock_at = str_field(details, "unlock_at").map(String::from);
                }
                item.content_hash = Some(hash_content(&format!(
                    "{}|{}|{}|{}|{}",
                    module_name,
                    module_type,
                    item.title,
                    entry.get("content_id").cloned().unwrap_or(Value::Null),
                    external.unwrap_or_default()
                )));
                item.extra.insert("module_name".to_string(), Value::String(module_name.clone()));
                item.extra.insert("module_id".to_string(), Value::String(module_id.clone()));
                item.extra.insert("module_type".to_string(), Value::String(module_type));
                copy_fields(entry, &mut item, &["content_id", "page_url", "position"]);
                items.push(item);
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl Fetcher for CanvasFetcher {
    fn name(&self) -> &str {
        "canvas"
    }

    async fn list_courses(&self) -> Result<Vec<CourseRef>> {
        let raw = self
            .get_paginated("/courses", &[("enrollment_state", "active".to_string())])
            .await?;

        Ok(raw
            .iter()
            // Restricted courses come back as bare ids
            .filter(|c| !c.get("access_restricted_by_date").and_then(Value::as_bool).unwrap_or(false))
            .map(|c| {
                let course = CourseRef::new(id_field(c, "id"), text_field(c, "name"));
                match str_field(c, "course_code") {
                    Some(code) => course.with_code(code),
                    None => course,
                }
            })
            .filter(|c| !c.id.is_empty())
            .collect())
    }

    async fn list_items(&self, course_id: &str, kind: ItemKind) -> Result<Vec<Item>> {
        let items = match kind {
            ItemKind::Assignment => self.assignments(course_id).await?,
            ItemKind::Quiz => self.quizzes(course_id).await?,
            ItemKind::Page => self.pages(course_id).await?,
            ItemKind::Announcement => self.announcements(course_id).await?,
            ItemKind::File => self.files(course_id).await?,
            ItemKind::Discussion => self.discussions(course_id).await?,
            ItemKind::ModuleItem => self.module_items(course_id).await?,
        };
        Ok(items)
    }
}

#[async_trait]
impl FileSource for CanvasFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get_with_retry(url, &[]).await?;
        let bytes = response.bytes().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

/// SHA-256 of a body, hex encoded
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Target of the `rel="next"` entry in a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(header)
}

fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim().eq_ignore_ascii_case("rel=\"next\""))
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn text_field(value: &Value, key: &str) -> String {
    str_field(value, key).unwrap_or_default().trim().to_string()
}

/// Canvas ids are numbers in JSON; keep them as strings
fn id_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn copy_fields(source: &Value, item: &mut Item, keys: &[&str]) {
    for key in keys {
        if let Some(value) = source.get(*key).filter(|v| !v.is_null()) {
            item.extra.insert(key.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_next_link() {
        let header = r#"<https://canvas.example.edu/api/v1/courses?page=1&per_page=100>; rel="current",<https://canvas.example.edu/api/v1/courses?page=2&per_page=100>; rel="next",<https://canvas.example.edu/api/v1/courses?page=5&per_page=100>; rel="last""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://canvas.example.edu/api/v1/courses?page=2&per_page=100")
        );
        assert_eq!(parse_next_link(r#"<https://x/y?page=1>; rel="current""#), None);
    }

    #[test]
    fn test_id_field_accepts_numbers_and_strings() {
        let value = json!({"id": 12345, "page_id": "77", "missing": null});
        assert_eq!(id_field(&value, "id"), "12345");
        assert_eq!(id_field(&value, "page_id"), "77");
        assert_eq!(id_field(&value, "missing"), "");
    }

    #[test]
    fn test_session_cookies() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("canvas_session.json");

        assert!(matches!(
            CanvasAuth::from_session_file(&path),
            Err(FetchError::MissingCredentials(_))
        ));

        std::fs::write(
            &path,
            r#"{"cookies": [{"name": "canvas_session", "value": "abc", "domain": "x"}, {"name": "_csrf_token", "value": "def"}], "origins": []}"#,
        )
        .unwrap();
        assert_eq!(
            CanvasAuth::from_session_file(&path).unwrap(),
            CanvasAuth::Cookies("canvas_session=abc; _csrf_token=def".to_string())
        );

        std::fs::write(&path, r#"{"cookies": []}"#).unwrap();
        assert!(matches!(
            CanvasAuth::from_session_file(&path),
            Err(FetchError::BadSession { .. })
        ));
    }

    #[test]
    fn test_token_wins_over_session() {
        let settings = CanvasSettings {
            base_url: Some("https://canvas.example.edu".to_string()),
            token: Some("secret".to_string()),
            session_file: PathBuf::from("/nonexistent/session.json"),
            retry_attempts: 3,
        };
        assert_eq!(
            CanvasAuth::from_settings(&settings).unwrap(),
            CanvasAuth::Token("secret".to_string())
        );
    }

    #[test]
    fn test_retryable_errors() {
        let status = |code: u16| FetchError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            url: "https://x".to_string(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::Unauthorized {
            status: StatusCode::UNAUTHORIZED
        }
        .is_retryable());
    }

    #[test]
    fn test_hash_content() {
        assert_eq!(hash_content("abc").len(), 64);
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
    }
}
