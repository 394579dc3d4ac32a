//! HTML body extraction.
//!
//! Canvas descriptions, page bodies and announcement messages arrive as
//! HTML. This turns them into readable plain text plus the ordered list of
//! links they contain.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::domain::Link;

/// Elements that start a new paragraph in the text output
const BLOCKS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "table", "tr", "blockquote", "pre",
];

/// Elements whose content is never shown
const HIDDEN: &[&str] = &["script", "style", "noscript", "template"];

/// Plain text and links pulled out of an HTML fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub links: Vec<Link>,
}

/// DOM-based HTML to text converter
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    targets: Selector,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self> {
        let targets = Selector::parse("a[href], iframe[src]")
            .map_err(|e| anyhow!("Invalid link selector: {:?}", e))?;
        Ok(Self { targets })
    }

    /// Extract text and links; relative hrefs are resolved against `base_url`
    pub fn extract(&self, html: &str, base_url: Option<&str>) -> Extracted {
        let fragment = Html::parse_fragment(html);
        let base = base_url.and_then(|base| Url::parse(base.trim()).ok());
        Extracted {
            links: self.links(&fragment, base.as_ref()),
            text: text_of(&fragment),
        }
    }

    fn links(&self, fragment: &Html, base: Option<&Url>) -> Vec<Link> {
        let mut seen = HashSet::new();
        fragment
            .select(&self.targets)
            .filter_map(|element| {
                let node = element.value();
                let (target, label) = if node.name() == "iframe" {
                    let title = node
                        .attr("title")
                        .map(collapse_spaces)
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "Embedded content".to_string());
                    (node.attr("src")?, format!("[Video: {}]", title))
                } else {
                    (node.attr("href")?, collapse_spaces(&element.text().collect::<String>()))
                };
                resolve(target, base).map(|url| Link::new(url, label))
            })
            .filter(|link| seen.insert(link.url.clone()))
            .collect()
    }
}

/// Absolute http(s) URL for a link target, or `None` for anchors and mail links
fn resolve(target: &str, base: Option<&Url>) -> Option<String> {
    let target = target.trim();
    if target.is_empty() || target.starts_with('#') {
        return None;
    }

    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(target).ok()?,
            None if target.starts_with("//") => Url::parse(&format!("https:{}", target)).ok()?,
            None => return None,
        },
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn text_of(fragment: &Html) -> String {
    let mut raw = String::new();
    push_text(fragment.root_element(), &mut raw);

    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines().map(collapse_spaces) {
        // At most one blank line between paragraphs
        if line.is_empty() && lines.last().map_or(true, |last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };

        match child.value().name() {
            name if HIDDEN.contains(&name) => {}
            "br" => out.push('\n'),
            "li" => {
                out.push_str("\n• ");
                push_text(child, out);
            }
            name if BLOCKS.contains(&name) => {
                out.push_str("\n\n");
                push_text(child, out);
                out.push_str("\n\n");
            }
            _ => push_text(child, out),
        }
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_links() {
        let html = r#"
            <h2>Week 3</h2>
            <p>Read <a href="/courses/1/files/55?wrap=1">Chapter 3 &amp; notes</a> first.</p>
            <script>var x = "<a href='https://evil.example'>x</a>";</script>
            <ul><li>Watch the <a href="https://cccconfer.zoom.us/rec/share/abc">recording</a></li>
            <li>Email <a href="mailto:prof@example.edu">me</a></li></ul>
            <iframe title="Lecture 3" src="https://www.youtube.com/embed/xyz"></iframe>
        "#;

        let extracted = HtmlExtractor::new()
            .unwrap()
            .extract(html, Some("https://canvas.example.edu/"));

        let urls: Vec<&str> = extracted.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://canvas.example.edu/courses/1/files/55?wrap=1",
                "https://cccconfer.zoom.us/rec/share/abc",
                "https://www.youtube.com/embed/xyz",
            ]
        );
        assert_eq!(extracted.links[0].label, "Chapter 3 & notes");
        assert_eq!(extracted.links[2].label, "[Video: Lecture 3]");

        assert!(extracted.text.starts_with("Week 3"));
        assert!(extracted.text.contains("Read Chapter 3 & notes first."));
        assert!(extracted.text.contains("• Watch the recording"));
        assert!(!extracted.text.contains("evil"));
        assert!(!extracted.text.contains("\n\n\n"));
    }

    #[test]
    fn test_relative_and_unquoted_links_with_entities() {
        let html = r#"Read <a href="files/55">ch 3</a>, <a href=https://x.example/a>unquoted</a> and it&#8217;s &eacute;t&eacute;"#;
        let extracted = HtmlExtractor::new()
            .unwrap()
            .extract(html, Some("https://canvas.example.edu/courses/1/"));

        let urls: Vec<&str> = extracted.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://canvas.example.edu/courses/1/files/55", "https://x.example/a"]
        );
        assert_eq!(extracted.text, "Read ch 3, unquoted and it\u{2019}s \u{e9}t\u{e9}");
    }

    #[test]
    fn test_duplicate_links_collapse() {
        let html = r#"<a href="https://a.example/x">one</a> <a href="https://a.example/x">two</a>"#;
        let extracted = HtmlExtractor::new().unwrap().extract(html, None);
        assert_eq!(extracted.links.len(), 1);
        assert_eq!(extracted.links[0].label, "one");
    }

    #[test]
    fn test_relative_links_need_base() {
        let html = r##"<a href="/courses/1/pages/intro">intro</a><a href="#top">top</a>"##;
        assert!(HtmlExtractor::new().unwrap().extract(html, None).links.is_empty());
    }
}
