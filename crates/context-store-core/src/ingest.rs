//! Producer-side record builders.
//!
//! Each builder turns an upstream item (a Jira issue, a Confluence page, an
//! image caption, a section of a requirements document) into a
//! [`NewContext`] with a fixed text layout, so that records look the same
//! no matter which producer wrote them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{ContextKind, NewContext};

/// Title used when a document has no recognizable section headings.
pub const MAIN_SECTION: &str = "Main Section";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub updated: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfluencePage {
    pub id: String,
    pub title: String,
    pub version: String,
    pub last_modified: String,
    /// Page content as plain text.
    #[serde(default)]
    pub content: String,
}

/// A titled block of a requirements document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
}

pub fn jira_issue_record(partition_key: &str, issue: &JiraIssue) -> NewContext {
    let body = format!(
        "Issue Key: {}\nSummary: {}\nStatus: {}\nLast Updated: {}\n\nDescription:\n{}",
        issue.key, issue.summary, issue.status, issue.updated, issue.description
    );
    NewContext::new(
        partition_key,
        format!("Jira Issue: {} - {}", issue.key, issue.summary),
        body,
    )
    .with_kind(ContextKind::JiraIssue)
    .with_metadata("issue_key", issue.key.as_str())
    .with_metadata("status", issue.status.as_str())
    .with_metadata("updated", issue.updated.as_str())
}

pub fn confluence_page_record(partition_key: &str, page: &ConfluencePage) -> NewContext {
    let body = format!(
        "Page ID: {}\nTitle: {}\nVersion: {}\nLast Modified: {}\n\nContent:\n{}",
        page.id, page.title, page.version, page.last_modified, page.content
    );
    NewContext::new(partition_key, page.title.as_str(), body)
        .with_kind(ContextKind::ConfluencePage)
        .with_metadata("page_id", page.id.as_str())
        .with_metadata("version", page.version.as_str())
        .with_metadata("last_modified", page.last_modified.as_str())
}

/// An `image` record whose summary names the file and whose body is the
/// caption. The full path is kept in the `image_path` metadata entry.
pub fn image_record(partition_key: &str, image_path: &str, description: &str) -> NewContext {
    let file_name = Path::new(image_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_path.to_string());

    NewContext::new(partition_key, format!("Image: {}", file_name), description)
        .with_kind(ContextKind::Image)
        .with_metadata("image_path", image_path)
}

/// Split a plain-text requirements document into titled sections.
///
/// Lines are trimmed. A non-empty line that does not start with `-` or `•`
/// closes the current section and becomes the next title; other lines
/// accumulate into the current section. Sections with blank content are
/// dropped. When nothing survives, the whole text becomes one
/// [`MAIN_SECTION`].
pub fn split_sections(text: &str) -> Vec<Section> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut sections = Vec::new();
    let mut title = MAIN_SECTION.to_string();
    let mut current = String::new();

    for line in text.split('\n').map(str::trim) {
        if line.is_empty() && current.is_empty() {
            continue;
        }

        if !line.is_empty() && !line.starts_with('-') && !line.starts_with('•') {
            flush(&mut sections, &title, &current);
            current.clear();
            title = line.to_string();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut sections, &title, &current);

    if sections.is_empty() {
        sections.push(Section {
            title: MAIN_SECTION.to_string(),
            content: text.trim().to_string(),
        });
    }
    sections
}

fn flush(sections: &mut Vec<Section>, title: &str, content: &str) {
    let content = content.trim();
    if !content.is_empty() {
        sections.push(Section {
            title: title.to_string(),
            content: content.to_string(),
        });
    }
}

/// One `text` record per section: summary is the title, body the content.
pub fn section_records(partition_key: &str, sections: &[Section]) -> Vec<NewContext> {
    sections
        .iter()
        .map(|s| NewContext::new(partition_key, s.title.as_str(), s.content.as_str()))
        .collect()
}
