//! Story ledger: generated or curated work items, grouped by partition.
//!
//! Stories are never deleted. Lookups on unknown partitions or ids return
//! empty results, and updates to them are no-ops.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NewStory, Story};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryPartition {
    pub key: String,
    #[serde(default)]
    pub stories: Vec<Story>,
}

/// All stories, partitions in first-insertion order. Serializes as
/// `{ "partitions": [{ "key", "stories" }] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryLedger {
    #[serde(default)]
    partitions: Vec<StoryPartition>,
}

impl StoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a story. Assigns a fresh UUID when `story.id` is absent or
    /// empty; `published` defaults to `false`.
    pub fn add(&mut self, partition_key: &str, story: NewStory) -> Story {
        let id = match story.id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let stored = Story {
            id,
            partition_key: partition_key.to_string(),
            title: story.title,
            description: story.description,
            published: story.published.unwrap_or(false),
            extra: story.extra,
        };

        match self.partitions.iter_mut().find(|p| p.key == partition_key) {
            Some(partition) => partition.stories.push(stored.clone()),
            None => self.partitions.push(StoryPartition {
                key: partition_key.to_string(),
                stories: vec![stored.clone()],
            }),
        }
        stored
    }

    /// Stories in one partition, insertion order.
    pub fn list(&self, partition_key: &str) -> &[Story] {
        self.partitions
            .iter()
            .find(|p| p.key == partition_key)
            .map(|p| p.stories.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, partition_key: &str, story_id: &str) -> Option<&Story> {
        self.list(partition_key).iter().find(|s| s.id == story_id)
    }

    /// Merge `patch` into the first story with `story_id`.
    ///
    /// Returns `Ok(false)` when no such story exists. A patch with a
    /// wrongly typed field leaves the story unchanged and returns
    /// [`StoreError::InvalidPatch`](crate::error::StoreError::InvalidPatch).
    pub fn update(
        &mut self,
        partition_key: &str,
        story_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<bool> {
        let Some(partition) = self.partitions.iter_mut().find(|p| p.key == partition_key) else {
            return Ok(false);
        };
        let Some(story) = partition.stories.iter_mut().find(|s| s.id == story_id) else {
            return Ok(false);
        };

        *story = story.merged(patch)?;
        Ok(true)
    }

    pub fn mark_published(&mut self, partition_key: &str, story_id: &str) -> Result<bool> {
        let mut patch = Map::new();
        patch.insert("published".to_string(), Value::Bool(true));
        self.update(partition_key, story_id, &patch)
    }

    pub fn partition_keys(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.stories.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_add_then_list() {
        let mut ledger = StoryLedger::new();
        ledger.add("P", NewStory::titled("X"));

        let stories = ledger.list("P");
        assert_eq!(stories.len(), 1);
        assert!(!stories[0].published);
        assert!(!stories[0].id.is_empty());
        assert_eq!(stories[0].partition_key, "P");
    }

    #[test]
    fn test_add_keeps_supplied_id_and_flag() {
        let mut ledger = StoryLedger::new();
        let story = ledger.add(
            "P",
            NewStory {
                id: Some("fixed".to_string()),
                published: Some(true),
                ..NewStory::titled("Y")
            },
        );
        assert_eq!(story.id, "fixed");
        assert!(story.published);
    }

    #[test]
    fn test_empty_id_is_replaced() {
        let mut ledger = StoryLedger::new();
        let story = ledger.add(
            "P",
            NewStory {
                id: Some(String::new()),
                ..NewStory::titled("Z")
            },
        );
        assert!(Uuid::parse_str(&story.id).is_ok());
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let mut ledger = StoryLedger::new();
        for title in ["a", "b", "c"] {
            ledger.add("P", NewStory::titled(title));
        }
        let titles: Vec<&str> = ledger.list("P").iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert!(ledger.list("Q").is_empty());
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut ledger = StoryLedger::new();
        ledger.add("P", NewStory::titled("X"));
        let before = ledger.clone();

        assert!(!ledger.update("P", "missing", &patch(json!({"title": "Y"}))).unwrap());
        assert!(!ledger.update("Q", "missing", &patch(json!({"title": "Y"}))).unwrap());
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_update_merges_first_match() {
        let mut ledger = StoryLedger::new();
        let id = ledger.add("P", NewStory::titled("X")).id;

        assert!(ledger
            .update("P", &id, &patch(json!({"description": "D", "points": 5})))
            .unwrap());
        let story = ledger.get("P", &id).unwrap();
        assert_eq!(story.title, "X");
        assert_eq!(story.description, "D");
        assert_eq!(story.extra.get("points"), Some(&json!(5)));
    }

    #[test]
    fn test_invalid_patch_leaves_story() {
        let mut ledger = StoryLedger::new();
        let id = ledger.add("P", NewStory::titled("X")).id;
        let before = ledger.clone();

        let err = ledger
            .update("P", &id, &patch(json!({"published": "yes"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch(_)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_mark_published() {
        let mut ledger = StoryLedger::new();
        let id = ledger.add("P", NewStory::titled("X")).id;
        assert!(ledger.mark_published("P", &id).unwrap());
        assert!(ledger.get("P", &id).unwrap().published);
        assert!(!ledger.mark_published("P", "nope").unwrap());
    }

    #[test]
    fn test_serialized_shape() {
        let mut ledger = StoryLedger::new();
        ledger.add("P", NewStory::titled("X"));
        let v = serde_json::to_value(&ledger).unwrap();
        assert_eq!(v["partitions"][0]["key"], json!("P"));
        assert_eq!(v["partitions"][0]["stories"][0]["title"], json!("X"));

        let back: StoryLedger = serde_json::from_value(v).unwrap();
        assert_eq!(back, ledger);
    }
}
