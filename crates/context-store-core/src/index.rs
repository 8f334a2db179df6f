//! The context index: partitioned records plus one embedding vector per
//! record, kept in lockstep.
//!
//! Vectors are stored in *flattened order*: partitions in first-insertion
//! order, then records in insertion order within each partition. Every
//! `ContextIndex` value satisfies `vectors.len() == len()`.
//!
//! Mutation is copy-on-write. [`ContextIndex::appended`] and
//! [`ContextIndex::rebuilt`] build a complete new index (records and
//! vectors) and leave `self` untouched, so a failed embedding call cannot
//! leave records and vectors out of sync. Callers persist the new value
//! and then swap it in.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::{embed_checked, fingerprint, EmbeddingProvider};
use crate::error::Result;
use crate::models::{ContextRecord, NewContext};

/// All records sharing one partition key, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPartition {
    pub key: String,
    pub records: Vec<ContextRecord>,
}

/// Serializable form of the record half of the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub next_seq: u64,
    #[serde(default)]
    pub partitions: Vec<ContextPartition>,
}

/// Serializable form of the vector half of the index.
///
/// `fingerprint` identifies the corpus the vectors were computed from; a
/// mismatch on load means the vectors are stale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredVectors {
    pub model: String,
    pub dims: usize,
    pub fingerprint: String,
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextIndex {
    partitions: Vec<ContextPartition>,
    vectors: Vec<Vec<f32>>,
    next_seq: u64,
    model: String,
    dims: usize,
}

impl ContextIndex {
    /// An empty index tagged with the provider's model and dimensionality.
    pub fn empty(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            model: provider.model_name().to_string(),
            dims: provider.dims(),
            ..Default::default()
        }
    }

    /// Rebuild an index from persisted state.
    ///
    /// Stored vectors are reused only when they match the records exactly:
    /// same count, same model, same dimensionality, same corpus
    /// fingerprint. Otherwise every record is re-embedded once. The
    /// returned flag is `true` when a re-embed happened.
    pub fn restore(
        snapshot: ContextSnapshot,
        stored: Option<StoredVectors>,
        provider: &dyn EmbeddingProvider,
    ) -> Result<(ContextIndex, bool)> {
        let max_seq = snapshot
            .partitions
            .iter()
            .flat_map(|p| p.records.iter())
            .map(|r| r.seq + 1)
            .max()
            .unwrap_or(0);

        let mut index = ContextIndex {
            partitions: snapshot
                .partitions
                .into_iter()
                .filter(|p| !p.records.is_empty())
                .collect(),
            vectors: Vec::new(),
            next_seq: snapshot.next_seq.max(max_seq),
            model: provider.model_name().to_string(),
            dims: provider.dims(),
        };

        if index.is_empty() {
            return Ok((index, false));
        }

        if let Some(stored) = stored {
            if index.matches(&stored) {
                index.vectors = stored.vectors;
                return Ok((index, false));
            }
            debug!(
                stored_model = %stored.model,
                stored_dims = stored.dims,
                stored_count = stored.vectors.len(),
                records = index.len(),
                "stored vectors do not match records"
            );
        }

        Ok((index.rebuilt(provider)?, true))
    }

    fn matches(&self, stored: &StoredVectors) -> bool {
        stored.model == self.model
            && stored.dims == self.dims
            && stored.vectors.len() == self.len()
            && stored.vectors.iter().all(|v| v.len() == self.dims)
            && stored.fingerprint == self.fingerprint()
    }

    /// Records for one partition, in insertion order. Unknown keys yield an
    /// empty slice.
    pub fn get(&self, partition_key: &str) -> &[ContextRecord] {
        self.partitions
            .iter()
            .find(|p| p.key == partition_key)
            .map(|p| p.records.as_slice())
            .unwrap_or(&[])
    }

    /// Known partition keys in first-insertion order.
    pub fn partition_keys(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.key.as_str()).collect()
    }

    /// All records in flattened order.
    pub fn records(&self) -> impl Iterator<Item = &ContextRecord> {
        self.partitions.iter().flat_map(|p| p.records.iter())
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number the next inserted record will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// SHA-256 over the embedding texts of all records, flattened order.
    pub fn fingerprint(&self) -> String {
        let texts: Vec<String> = self.records().map(|r| r.embedding_text()).collect();
        fingerprint(texts.iter().map(String::as_str))
    }

    /// A new index with `new` appended and every record re-embedded.
    ///
    /// Sequence numbers are assigned in input order and all new records
    /// share one `updated_at`. An empty batch returns an unchanged copy
    /// without calling the provider.
    pub fn appended(
        &self,
        new: Vec<NewContext>,
        provider: &dyn EmbeddingProvider,
    ) -> Result<ContextIndex> {
        if new.is_empty() {
            return Ok(self.clone());
        }

        let mut staged = ContextIndex {
            partitions: self.partitions.clone(),
            vectors: Vec::new(),
            next_seq: self.next_seq,
            model: self.model.clone(),
            dims: self.dims,
        };

        let now = Utc::now();
        for item in new {
            let record = ContextRecord::from_new(item, staged.next_seq, now);
            staged.next_seq += 1;
            match staged
                .partitions
                .iter_mut()
                .find(|p| p.key == record.partition_key)
            {
                Some(partition) => partition.records.push(record),
                None => staged.partitions.push(ContextPartition {
                    key: record.partition_key.clone(),
                    records: vec![record],
                }),
            }
        }

        staged.rebuilt(provider)
    }

    /// A copy of this index with every vector recomputed by `provider`.
    pub fn rebuilt(&self, provider: &dyn EmbeddingProvider) -> Result<ContextIndex> {
        let texts: Vec<String> = self.records().map(|r| r.embedding_text()).collect();
        debug!(records = texts.len(), model = provider.model_name(), "re-embedding index");
        let vectors = embed_checked(provider, &texts)?;

        Ok(ContextIndex {
            partitions: self.partitions.clone(),
            vectors,
            next_seq: self.next_seq,
            model: provider.model_name().to_string(),
            dims: provider.dims(),
        })
    }

    pub fn to_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            next_seq: self.next_seq,
            partitions: self.partitions.clone(),
        }
    }

    pub fn to_stored(&self) -> StoredVectors {
        StoredVectors {
            model: self.model.clone(),
            dims: self.dims,
            fingerprint: self.fingerprint(),
            vectors: self.vectors.clone(),
        }
    }
}
