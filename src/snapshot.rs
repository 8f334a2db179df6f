//! Snapshot persistence for the context index and the story ledger.
//!
//! A data directory holds three independent JSON files, each overwritten
//! wholesale on every mutation:
//!
//! | File | Contents |
//! |------|----------|
//! | `contexts.json` | records by partition plus the next sequence number |
//! | `vectors.json` | model, dims, corpus fingerprint, base64 vectors |
//! | `stories.json` | stories by partition |
//!
//! Writes go to a sibling `*.tmp` file that is renamed into place. The two
//! index files are both staged before either is renamed, and a failed
//! vector rename puts the previous `contexts.json` back, so a rejected
//! insert never reaches disk. Loads never fail: a missing or unreadable
//! file yields empty state and a `warn!` event. The vector file carries a
//! fingerprint of the records it was computed from, so a crash between the
//! two renames is still detected on the next open.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use context_store_core::embedding::{blob_to_vec, vec_to_blob};
use context_store_core::index::{ContextIndex, ContextSnapshot, StoredVectors};
use context_store_core::ledger::StoryLedger;
use context_store_core::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONTEXTS_FILE: &str = "contexts.json";
pub const VECTORS_FILE: &str = "vectors.json";
pub const STORIES_FILE: &str = "stories.json";

/// On-disk shape of `vectors.json`.
#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    model: String,
    dims: usize,
    fingerprint: String,
    /// Little-endian `f32` bytes, base64 encoded, one entry per record.
    vectors: Vec<String>,
}

impl VectorFile {
    fn encode(stored: &StoredVectors) -> Self {
        Self {
            model: stored.model.clone(),
            dims: stored.dims,
            fingerprint: stored.fingerprint.clone(),
            vectors: stored
                .vectors
                .iter()
                .map(|v| STANDARD.encode(vec_to_blob(v)))
                .collect(),
        }
    }

    fn decode(self) -> std::result::Result<StoredVectors, String> {
        let mut vectors = Vec::with_capacity(self.vectors.len());
        for (i, encoded) in self.vectors.iter().enumerate() {
            let blob = STANDARD
                .decode(encoded)
                .map_err(|e| format!("vector {}: {}", i, e))?;
            if blob.len() % 4 != 0 {
                return Err(format!("vector {}: {} bytes is not a whole f32 count", i, blob.len()));
            }
            vectors.push(blob_to_vec(&blob));
        }
        Ok(StoredVectors {
            model: self.model,
            dims: self.dims,
            fingerprint: self.fingerprint,
            vectors,
        })
    }
}

/// Reads and writes the snapshot files of one data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Use `dir` as the data directory, creating it if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Persistence(format!(
                "Failed to create data directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_contexts(&self) -> ContextSnapshot {
        self.load_json(CONTEXTS_FILE).unwrap_or_default()
    }

    pub fn load_vectors(&self) -> Option<StoredVectors> {
        let file: VectorFile = self.load_json(VECTORS_FILE)?;
        match file.decode() {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(file = VECTORS_FILE, error = %e, "undecodable vector snapshot, ignoring");
                None
            }
        }
    }

    pub fn load_stories(&self) -> StoryLedger {
        self.load_json(STORIES_FILE).unwrap_or_default()
    }

    /// Write both halves of the index. Nothing is renamed until both
    /// temp files are written; on any failure the previous files stay.
    pub fn save_index(&self, index: &ContextIndex) -> Result<()> {
        let contexts_tmp = self.stage_json(CONTEXTS_FILE, &index.to_snapshot())?;
        let vectors_tmp =
            match self.stage_json(VECTORS_FILE, &VectorFile::encode(&index.to_stored())) {
                Ok(tmp) => tmp,
                Err(e) => {
                    discard(&contexts_tmp);
                    return Err(e);
                }
            };

        let contexts_path = self.dir.join(CONTEXTS_FILE);
        let previous = fs::read(&contexts_path).ok();
        if let Err(e) = commit(&contexts_tmp, &contexts_path) {
            discard(&contexts_tmp);
            discard(&vectors_tmp);
            return Err(e);
        }
        if let Err(e) = commit(&vectors_tmp, &self.dir.join(VECTORS_FILE)) {
            discard(&vectors_tmp);
            self.roll_back_contexts(previous.as_deref());
            return Err(e);
        }

        info!(records = index.len(), dir = %self.dir.display(), "context snapshot written");
        Ok(())
    }

    pub fn save_stories(&self, ledger: &StoryLedger) -> Result<()> {
        self.write_json(STORIES_FILE, ledger)?;
        info!(stories = ledger.len(), dir = %self.dir.display(), "story snapshot written");
        Ok(())
    }

    fn load_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %path.display(), "no snapshot yet");
                return None;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable snapshot, starting empty");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "corrupt snapshot, starting empty");
                None
            }
        }
    }

    fn roll_back_contexts(&self, previous: Option<&[u8]>) {
        let path = self.dir.join(CONTEXTS_FILE);
        let restored = match previous {
            Some(bytes) => fs::write(&path, bytes),
            None => fs::remove_file(&path),
        };
        if let Err(e) = restored {
            warn!(file = %path.display(), error = %e, "could not restore previous snapshot");
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let tmp = self.stage_json(name, value)?;
        commit(&tmp, &self.dir.join(name)).map_err(|e| {
            discard(&tmp);
            e
        })
    }

    /// Serialize `value` into `<name>.tmp` and return that path.
    fn stage_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, &bytes).map_err(|e| {
            StoreError::Persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        Ok(tmp)
    }
}

fn commit(tmp: &Path, path: &Path) -> Result<()> {
    fs::rename(tmp, path).map_err(|e| {
        StoreError::Persistence(format!(
            "Failed to move {} into place: {}",
            path.display(),
            e
        ))
    })
}

fn discard(tmp: &Path) {
    if tmp.is_file() {
        let _ = fs::remove_file(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_store_core::embedding::EmbeddingProvider;
    use context_store_core::models::{NewContext, NewStory};

    struct Unit;

    impl EmbeddingProvider for Unit {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, -0.5]).collect())
        }
    }

    #[test]
    fn test_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let index = ContextIndex::empty(&Unit)
            .appended(vec![NewContext::new("P", "a", "b")], &Unit)
            .unwrap();

        store.save_index(&index).unwrap();

        assert_eq!(store.load_contexts(), index.to_snapshot());
        assert_eq!(store.load_vectors(), Some(index.to_stored()));
        assert!(!dir.path().join("contexts.json.tmp").exists());
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("nested/data")).unwrap();
        assert!(store.dir().is_dir());
        assert!(store.load_contexts().partitions.is_empty());
        assert!(store.load_vectors().is_none());
        assert!(store.load_stories().is_empty());
    }

    #[test]
    fn test_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(CONTEXTS_FILE), "{not json").unwrap();
        fs::write(dir.path().join(STORIES_FILE), "[1, 2]").unwrap();
        fs::write(
            dir.path().join(VECTORS_FILE),
            r#"{"model":"unit","dims":2,"fingerprint":"x","vectors":["%%%"]}"#,
        )
        .unwrap();

        assert!(store.load_contexts().partitions.is_empty());
        assert!(store.load_stories().is_empty());
        assert!(store.load_vectors().is_none());
    }

    #[test]
    fn test_stories_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut ledger = StoryLedger::new();
        ledger.add("P", NewStory::titled("X"));

        store.save_stories(&ledger).unwrap();
        assert_eq!(store.load_stories(), ledger);
    }

    #[test]
    fn test_write_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        fs::create_dir(dir.path().join("stories.json.tmp")).unwrap();

        let err = store.save_stories(&StoryLedger::new()).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
    }

    #[test]
    fn test_failed_vector_write_keeps_previous_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let first = ContextIndex::empty(&Unit)
            .appended(vec![NewContext::new("P", "a", "b")], &Unit)
            .unwrap();
        store.save_index(&first).unwrap();
        let contexts_before = fs::read(dir.path().join(CONTEXTS_FILE)).unwrap();
        let vectors_before = fs::read(dir.path().join(VECTORS_FILE)).unwrap();

        fs::create_dir(dir.path().join("vectors.json.tmp")).unwrap();
        let second = first
            .appended(vec![NewContext::new("P", "c", "d")], &Unit)
            .unwrap();
        let err = store.save_index(&second).unwrap_err();

        assert!(matches!(err, StoreError::Persistence(_)));
        assert_eq!(fs::read(dir.path().join(CONTEXTS_FILE)).unwrap(), contexts_before);
        assert_eq!(fs::read(dir.path().join(VECTORS_FILE)).unwrap(), vectors_before);
        assert!(!dir.path().join("contexts.json.tmp").exists());
    }

    #[test]
    fn test_failed_vector_rename_restores_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let first = ContextIndex::empty(&Unit)
            .appended(vec![NewContext::new("P", "a", "b")], &Unit)
            .unwrap();
        store.save_index(&first).unwrap();
        let contexts_before = fs::read(dir.path().join(CONTEXTS_FILE)).unwrap();

        // A non-empty directory at the target makes the rename fail.
        fs::remove_file(dir.path().join(VECTORS_FILE)).unwrap();
        fs::create_dir(dir.path().join(VECTORS_FILE)).unwrap();
        fs::write(dir.path().join(VECTORS_FILE).join("keep"), "x").unwrap();

        let second = first
            .appended(vec![NewContext::new("P", "c", "d")], &Unit)
            .unwrap();
        assert!(store.save_index(&second).is_err());
        assert_eq!(fs::read(dir.path().join(CONTEXTS_FILE)).unwrap(), contexts_before);
        assert!(!dir.path().join("vectors.json.tmp").exists());
    }
}
