//! Core data models used throughout Context Store.
//!
//! These types represent the context records that flow through the
//! embedding and retrieval pipeline, and the stories kept by the ledger.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Provenance of a context record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    #[default]
    Text,
    JiraIssue,
    ConfluencePage,
    Image,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Text => "text",
            ContextKind::JiraIssue => "jira_issue",
            ContextKind::ConfluencePage => "confluence_page",
            ContextKind::Image => "image",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ContextKind::Text),
            "jira_issue" => Ok(ContextKind::JiraIssue),
            "confluence_page" => Ok(ContextKind::ConfluencePage),
            "image" => Ok(ContextKind::Image),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown context kind '{}'. Must be text, jira_issue, confluence_page, or image",
                other
            ))),
        }
    }
}

/// A context record as supplied by a producer, before the store assigns
/// its sequence number and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContext {
    pub partition_key: String,
    pub summary: String,
    pub body: String,
    pub kind: ContextKind,
    pub metadata: BTreeMap<String, String>,
}

impl NewContext {
    /// A plain `text` record with no metadata.
    pub fn new(
        partition_key: impl Into<String>,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            summary: summary.into(),
            body: body.into(),
            kind: ContextKind::Text,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: ContextKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One unit of retrievable text with provenance metadata.
///
/// Records are immutable once stored. `seq` is a store-wide insertion
/// counter; it orders records across partitions for tie-breaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub seq: u64,
    pub partition_key: String,
    pub summary: String,
    pub body: String,
    #[serde(default)]
    pub kind: ContextKind,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    pub(crate) fn from_new(new: NewContext, seq: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            partition_key: new.partition_key,
            summary: new.summary,
            body: new.body,
            kind: new.kind,
            metadata: new.metadata,
            updated_at,
        }
    }

    /// The text handed to the embedding provider: summary, a space, then body.
    pub fn embedding_text(&self) -> String {
        if self.body.is_empty() {
            self.summary.clone()
        } else {
            format!("{} {}", self.summary, self.body)
        }
    }
}

/// A generated or curated work item kept by the [`StoryLedger`](crate::ledger::StoryLedger).
///
/// Fields other than the typed ones are preserved verbatim in `extra`
/// and flattened back into the object when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub partition_key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    /// Merge a partial-field patch into a copy of this story.
    ///
    /// `id` and `partition_key` in the patch are ignored. A value of the
    /// wrong type for a typed field rejects the whole patch.
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<Story> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| StoreError::InvalidPatch(e.to_string()))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidPatch("story is not a JSON object".to_string()))?;

        for (key, field) in patch {
            if key == "id" || key == "partition_key" {
                continue;
            }
            object.insert(key.clone(), field.clone());
        }

        serde_json::from_value(value).map_err(|e| StoreError::InvalidPatch(e.to_string()))
    }
}

/// Input for [`StoryLedger::add`](crate::ledger::StoryLedger::add).
///
/// A missing (or empty) id is replaced by a fresh UUID and a missing
/// publish flag defaults to `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStory {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub published: Option<bool>,
    pub extra: Map<String, Value>,
}

impl NewStory {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build from a free-form JSON object, the shape API collaborators send.
    ///
    /// `id`, `title` and `description` must be strings and `published` a
    /// boolean when present; anything else is `InvalidPatch`.
    pub fn from_json(object: Map<String, Value>) -> Result<Self> {
        let mut extra = object;
        let id = match extra.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                return Err(StoreError::InvalidPatch(format!(
                    "id must be a string, got {}",
                    other
                )))
            }
        };
        let title = take_string(&mut extra, "title")?;
        let description = take_string(&mut extra, "description")?;
        let published = match extra.remove("published") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(b),
            Some(other) => {
                return Err(StoreError::InvalidPatch(format!(
                    "published must be a boolean, got {}",
                    other
                )))
            }
        };
        extra.remove("partition_key");

        Ok(Self {
            id,
            title,
            description,
            published,
            extra,
        })
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Result<String> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(StoreError::InvalidPatch(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}
