//! The application facade: one data directory, one embedding provider,
//! the context index, and the story ledger.
//!
//! Every mutation follows the same commit sequence: build the new state
//! next to the current one, persist it, then swap it in. A failure at any
//! step leaves memory and disk as they were.
//!
//! The index (records and vectors together) and the ledger each sit behind
//! their own `Mutex`, so a `Workspace` can be shared across threads and no
//! reader ever sees records without their vectors.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use context_store_core::embedding::EmbeddingProvider;
use context_store_core::index::ContextIndex;
use context_store_core::ingest::image_record;
use context_store_core::ledger::StoryLedger;
use context_store_core::models::{ContextRecord, NewContext, NewStory, Story};
use context_store_core::search::{search, SearchHit, SearchRequest};
use context_store_core::{Result, StoreError};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::snapshot::SnapshotStore;

pub struct Workspace {
    provider: Box<dyn EmbeddingProvider>,
    snapshots: SnapshotStore,
    contexts: Mutex<ContextIndex>,
    stories: Mutex<StoryLedger>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Workspace {
    /// Open the workspace stored in `dir` (created if missing).
    ///
    /// Missing or corrupt snapshot files start empty. When the stored
    /// vectors do not match the records or the provider's model, every
    /// record is re-embedded once and the result is persisted; a failure
    /// there fails the open.
    pub fn open(dir: &Path, provider: Box<dyn EmbeddingProvider>) -> Result<Self> {
        let snapshots = SnapshotStore::open(dir)?;

        let (index, rebuilt) = ContextIndex::restore(
            snapshots.load_contexts(),
            snapshots.load_vectors(),
            provider.as_ref(),
        )?;
        if rebuilt {
            info!(
                records = index.len(),
                model = provider.model_name(),
                "stored vectors were stale, re-embedded"
            );
            snapshots.save_index(&index)?;
        }

        let stories = snapshots.load_stories();
        info!(
            dir = %dir.display(),
            records = index.len(),
            stories = stories.len(),
            "workspace opened"
        );

        Ok(Self {
            provider,
            snapshots,
            contexts: Mutex::new(index),
            stories: Mutex::new(stories),
        })
    }

    /// Build the configured provider and open `storage.path`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider = create_provider(&config.embedding)?;
        Ok(Self::open(&config.storage.path, provider)?)
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    // ============ Contexts ============

    /// Append one record, re-embed everything, persist.
    pub fn insert_context(&self, new: NewContext) -> Result<ContextRecord> {
        let mut inserted = self.insert_contexts(vec![new])?;
        inserted
            .pop()
            .ok_or_else(|| StoreError::Persistence("insert produced no record".to_string()))
    }

    /// Append a batch of records with a single re-embed. All or nothing.
    pub fn insert_contexts(&self, batch: Vec<NewContext>) -> Result<Vec<ContextRecord>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let count = batch.len();

        let mut current = lock(&self.contexts);
        let first_seq = current.next_seq();
        let staged = current.appended(batch, self.provider.as_ref())?;
        self.snapshots.save_index(&staged)?;
        *current = staged;

        info!(inserted = count, total = current.len(), "contexts inserted");
        Ok(current
            .records()
            .filter(|r| r.seq >= first_seq)
            .cloned()
            .collect())
    }

    /// Insert an `image` record captioned by `description`.
    pub fn insert_image_context(
        &self,
        partition_key: &str,
        image_path: &str,
        description: &str,
    ) -> Result<ContextRecord> {
        self.insert_context(image_record(partition_key, image_path, description))
    }

    /// Records of one partition in insertion order; empty when unknown.
    pub fn get_contexts(&self, partition_key: &str) -> Vec<ContextRecord> {
        lock(&self.contexts).get(partition_key).to_vec()
    }

    pub fn partitions(&self) -> Vec<String> {
        lock(&self.contexts)
            .partition_keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn context_count(&self) -> usize {
        lock(&self.contexts).len()
    }

    pub fn vector_count(&self) -> usize {
        lock(&self.contexts).vectors().len()
    }

    pub fn search_context(
        &self,
        query: &str,
        top_k: i64,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let index = lock(&self.contexts);
        let hits = search(
            &index,
            self.provider.as_ref(),
            &SearchRequest {
                query,
                top_k,
                similarity_threshold,
            },
        )?;
        debug!(query, top_k, hits = hits.len(), "search_context");
        Ok(hits)
    }

    /// Re-embed every record with the active provider. Returns the number
    /// of records embedded.
    pub fn reindex(&self) -> Result<usize> {
        let mut current = lock(&self.contexts);
        let staged = current.rebuilt(self.provider.as_ref())?;
        self.snapshots.save_index(&staged)?;
        *current = staged;

        info!(records = current.len(), model = self.provider.model_name(), "reindexed");
        Ok(current.len())
    }

    // ============ Stories ============

    pub fn add_story(&self, partition_key: &str, story: NewStory) -> Result<Story> {
        let mut current = lock(&self.stories);
        let mut staged = current.clone();
        let added = staged.add(partition_key, story);
        self.snapshots.save_stories(&staged)?;
        *current = staged;

        info!(partition = partition_key, id = %added.id, "story added");
        Ok(added)
    }

    pub fn list_stories(&self, partition_key: &str) -> Vec<Story> {
        lock(&self.stories).list(partition_key).to_vec()
    }

    pub fn get_story(&self, partition_key: &str, story_id: &str) -> Option<Story> {
        lock(&self.stories).get(partition_key, story_id).cloned()
    }

    /// Merge `patch` into a story. `Ok(false)` when the story does not
    /// exist; nothing is written in that case.
    pub fn update_story(
        &self,
        partition_key: &str,
        story_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<bool> {
        self.mutate_story(partition_key, story_id, |ledger| {
            ledger.update(partition_key, story_id, patch)
        })
    }

    pub fn mark_published(&self, partition_key: &str, story_id: &str) -> Result<bool> {
        self.mutate_story(partition_key, story_id, |ledger| {
            ledger.mark_published(partition_key, story_id)
        })
    }

    fn mutate_story<F>(&self, partition_key: &str, story_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut StoryLedger) -> Result<bool>,
    {
        let mut current = lock(&self.stories);
        let mut staged = current.clone();
        if !apply(&mut staged)? {
            debug!(partition = partition_key, id = story_id, "story not found, nothing to update");
            return Ok(false);
        }
        self.snapshots.save_stories(&staged)?;
        *current = staged;

        info!(partition = partition_key, id = story_id, "story updated");
        Ok(true)
    }
}
