//! Course identity shared by registry, manifest and bundles.

use serde::{Deserialize, Serialize};

use crate::config::paths::sanitize_filename;

/// A Canvas course as referenced from persisted documents
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CourseRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Directory name of this course under the download root
    pub fn dir_name(&self) -> String {
        let name = if self.name.trim().is_empty() {
            format!("course_{}", self.id)
        } else {
            self.name.clone()
        };
        sanitize_filename(&name)
    }

    /// Case-insensitive match on name, code or id (`--course` filter)
    pub fn matches_filter(&self, filter: &str) -> bool {
        let needle = filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.id == needle
            || self.name.to_lowercase().contains(&needle)
            || self
                .code
                .as_deref()
                .is_some_and(|code| code.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_name_code_and_id() {
        let course = CourseRef::new("1234", "Nutrition Fundamentals").with_code("FDNT 10");
        assert!(course.matches_filter("fdnt 10"));
        assert!(course.matches_filter("nutrition"));
        assert!(course.matches_filter("1234"));
        assert!(!course.matches_filter("BIO 1"));
    }

    #[test]
    fn test_dir_name_is_sanitized() {
        let course = CourseRef::new("9", "HLTH 5: Coaching / Wellness");
        assert_eq!(course.dir_name(), "HLTH 5_ Coaching _ Wellness");
        assert_eq!(CourseRef::new("9", " ").dir_name(), "course_9");
    }
}
