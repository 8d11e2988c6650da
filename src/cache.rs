//! Persistent embedding cache.
//!
//! Layout under the cache directory:
//!
//! ```text
//! index.json        key -> {seq, inserted_at, size_bytes, dims, model}
//! <key>.bin         little-endian f32 blob
//! ```
//!
//! Keys are the hex SHA-256 of the whitespace-normalized text and the model
//! id, so the same text embedded by two models never collides. The blob is
//! written before the index references it and the index is replaced
//! atomically (temp file + rename), so a crash loses at most the latest
//! insertion.
//!
//! The cache is bounded by entry count or by aggregate blob bytes; eviction
//! removes the least recently *inserted* entry first. Reads never refresh
//! an entry's age. Blobs are read under the index read guard, so a read
//! never overlaps an eviction or an insertion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use summary_rag_core::embedding::{blob_to_vec, vec_to_blob};
use summary_rag_core::preprocess::normalize_whitespace;
use summary_rag_core::{KbError, Result};
use tracing::{debug, warn};

use crate::config::CacheConfig;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLimit {
    Entries(usize),
    Bytes(u64),
}

impl CacheLimit {
    pub fn from_config(cache: &CacheConfig) -> Self {
        match cache.max_bytes {
            Some(bytes) => CacheLimit::Bytes(bytes),
            None => CacheLimit::Entries(cache.max_entries),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub seq: u64,
    pub inserted_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub dims: usize,
    pub model: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    next_seq: u64,
    entries: HashMap<String, CacheEntry>,
}

impl CacheIndex {
    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.seq)
            .map(|(k, _)| k.clone())
    }
}

pub struct EmbeddingCache {
    dir: PathBuf,
    limit: CacheLimit,
    index: RwLock<CacheIndex>,
}

/// Cache key for `text` under `model`.
pub fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

impl EmbeddingCache {
    /// Open (or create) the cache in `dir`. A malformed index resets the
    /// cache to empty; an index over budget is trimmed immediately.
    pub fn open(dir: impl Into<PathBuf>, limit: CacheLimit) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = match std::fs::read_to_string(&index_path) {
            Ok(content) => match serde_json::from_str::<CacheIndex>(&content) {
                Ok(index) => index,
                Err(e) => {
                    warn!(
                        path = %index_path.display(),
                        error = %e,
                        "malformed cache index, starting empty"
                    );
                    CacheIndex::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => return Err(e.into()),
        };

        let cache = Self {
            dir,
            limit,
            index: RwLock::new(index),
        };
        {
            let mut index = cache.write_index()?;
            if cache.evict_to_fit(&mut index, None) > 0 {
                cache.flush(&index)?;
            }
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up a vector. Corrupt entries are dropped and reported as a miss.
    pub fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = cache_key(text, model);
        let (entry, outcome) = {
            let index = self.index.read().ok()?;
            let entry = index.entries.get(&key).cloned()?;
            let outcome = self.read_blob(&key, &entry);
            (entry, outcome)
        };

        match outcome {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "discarding cache entry");
                if let Err(e) = self.discard(&key, entry.seq) {
                    warn!(key = %key, error = %e, "failed to discard corrupt cache entry");
                }
                None
            }
        }
    }

    fn read_blob(&self, key: &str, entry: &CacheEntry) -> Result<Vec<f32>> {
        let corruption = |reason: String| KbError::CacheCorruption {
            key: key.to_string(),
            reason,
        };
        let bytes =
            std::fs::read(self.blob_path(key)).map_err(|e| corruption(format!("unreadable blob: {}", e)))?;
        let vector = blob_to_vec(&bytes)
            .ok_or_else(|| corruption(format!("blob length {} is not a multiple of 4", bytes.len())))?;
        if vector.len() != entry.dims {
            return Err(corruption(format!(
                "blob holds {} values, index says {}",
                vector.len(),
                entry.dims
            )));
        }
        Ok(vector)
    }

    /// Drop `key` unless it was replaced since `seq` was read.
    fn discard(&self, key: &str, seq: u64) -> Result<()> {
        let mut index = self.write_index()?;
        if index.entries.get(key).is_some_and(|e| e.seq == seq) {
            index.entries.remove(key);
            remove_file_if_exists(&self.blob_path(key))?;
            self.flush(&index)?;
        }
        Ok(())
    }

    /// Store a vector, evicting the oldest insertions as needed. Re-putting
    /// an existing key overwrites it and makes it the newest entry. A vector
    /// larger than the whole byte budget is not cached.
    pub fn put(&self, text: &str, model: &str, vector: &[f32]) -> Result<()> {
        let key = cache_key(text, model);
        let blob = vec_to_blob(vector);
        let size = blob.len() as u64;
        if let CacheLimit::Bytes(max) = self.limit {
            if size > max {
                warn!(size, budget = max, "embedding larger than cache budget, not cached");
                return Ok(());
            }
        }

        let mut index = self.write_index()?;
        if index.entries.remove(&key).is_some() {
            remove_file_if_exists(&self.blob_path(&key))?;
        }
        self.evict_to_fit(&mut index, Some(size));

        write_atomic(&self.blob_path(&key), &blob)?;
        let seq = index.next_seq;
        index.next_seq += 1;
        index.entries.insert(
            key.clone(),
            CacheEntry {
                seq,
                inserted_at: Utc::now(),
                size_bytes: size,
                dims: vector.len(),
                model: model.to_string(),
            },
        );
        self.flush(&index)?;
        debug!(key = %key, dims = vector.len(), "cached embedding");
        Ok(())
    }

    /// Evict oldest entries until one more entry of `incoming` bytes fits.
    /// With `None` the current contents are brought within budget.
    /// Returns the number of evicted entries.
    fn evict_to_fit(&self, index: &mut CacheIndex, incoming: Option<u64>) -> usize {
        let mut evicted = 0;
        loop {
            let over = match self.limit {
                CacheLimit::Entries(max) => {
                    index.entries.len() + usize::from(incoming.is_some()) > max
                }
                CacheLimit::Bytes(max) => index.total_bytes() + incoming.unwrap_or(0) > max,
            };
            if !over {
                break;
            }
            let Some(oldest) = index.oldest_key() else {
                break;
            };
            index.entries.remove(&oldest);
            if let Err(e) = remove_file_if_exists(&self.blob_path(&oldest)) {
                warn!(key = %oldest, error = %e, "failed to remove evicted blob");
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "evicted cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.index.read().map(|i| i.total_bytes()).unwrap_or(0)
    }

    pub fn contains(&self, text: &str, model: &str) -> bool {
        let key = cache_key(text, model);
        self.index
            .read()
            .map(|i| i.entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Remove every entry and blob.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.write_index()?;
        for key in index.entries.keys() {
            remove_file_if_exists(&self.blob_path(key))?;
        }
        index.entries.clear();
        self.flush(&index)
    }

    fn write_index(&self) -> Result<std::sync::RwLockWriteGuard<'_, CacheIndex>> {
        self.index
            .write()
            .map_err(|_| KbError::State("embedding cache lock poisoned".to_string()))
    }

    fn flush(&self, index: &CacheIndex) -> Result<()> {
        let json = serde_json::to_vec(index)?;
        write_atomic(&self.dir.join(INDEX_FILE), &json)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }
}

/// Write via a sibling temp file and rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "text-embedding-ada-002";

    fn open(dir: &Path, limit: CacheLimit) -> EmbeddingCache {
        EmbeddingCache::open(dir, limit).unwrap()
    }

    #[test]
    fn keys_are_stable_and_model_scoped() {
        assert_eq!(cache_key("hello  world", MODEL), cache_key("hello world\n", MODEL));
        assert_ne!(cache_key("hello", MODEL), cache_key("hello", "other-model"));
        assert_ne!(cache_key("hello", MODEL), cache_key("hellp", MODEL));
        assert_eq!(cache_key("x", MODEL).len(), 64);
    }

    #[test]
    fn put_then_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), CacheLimit::Entries(10));
            assert_eq!(cache.get("alpha", MODEL), None);
            cache.put("alpha", MODEL, &[1.0, 2.0, 3.0]).unwrap();
            assert_eq!(cache.get("alpha", MODEL), Some(vec![1.0, 2.0, 3.0]));
        }
        let cache = open(dir.path(), CacheLimit::Entries(10));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("alpha", MODEL), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(cache.get("alpha", "other-model"), None);
    }

    #[test]
    fn entry_budget_evicts_oldest_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(2));
        cache.put("a", MODEL, &[1.0]).unwrap();
        cache.put("b", MODEL, &[2.0]).unwrap();
        // Reading does not refresh age.
        assert!(cache.get("a", MODEL).is_some());
        cache.put("c", MODEL, &[3.0]).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a", MODEL));
        assert!(cache.contains("b", MODEL));
        assert!(cache.contains("c", MODEL));
        assert!(!dir.path().join(format!("{}.bin", cache_key("a", MODEL))).exists());
    }

    #[test]
    fn byte_budget_evicts_until_fit() {
        let dir = tempfile::tempdir().unwrap();
        // Each 2-dim vector is 8 bytes.
        let cache = open(dir.path(), CacheLimit::Bytes(20));
        cache.put("a", MODEL, &[1.0, 1.0]).unwrap();
        cache.put("b", MODEL, &[2.0, 2.0]).unwrap();
        cache.put("c", MODEL, &[3.0, 3.0]).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.total_bytes() <= 20);
        assert!(!cache.contains("a", MODEL));
    }

    #[test]
    fn vector_over_byte_budget_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Bytes(100));
        cache.put("small", MODEL, &[1.0, 2.0]).unwrap();

        cache.put("large", MODEL, &[0.5; 1536]).unwrap();
        assert!(!cache.contains("large", MODEL));
        assert_eq!(cache.get("large", MODEL), None);
        assert!(cache.contains("small", MODEL));
        assert_eq!(cache.total_bytes(), 8);
        assert!(!dir
            .path()
            .join(format!("{}.bin", cache_key("large", MODEL)))
            .exists());
    }

    #[test]
    fn stale_discard_keeps_replaced_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(10));
        let key = cache_key("a", MODEL);
        cache.put("a", MODEL, &[1.0]).unwrap();
        let old_seq = cache.index.read().unwrap().entries[&key].seq;

        cache.put("a", MODEL, &[2.0]).unwrap();
        cache.discard(&key, old_seq).unwrap();

        assert_eq!(cache.get("a", MODEL), Some(vec![2.0]));
        assert!(dir.path().join(format!("{}.bin", key)).exists());
    }

    #[test]
    fn reput_refreshes_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(2));
        cache.put("a", MODEL, &[1.0]).unwrap();
        cache.put("b", MODEL, &[2.0]).unwrap();
        cache.put("a", MODEL, &[1.5]).unwrap();
        cache.put("c", MODEL, &[3.0]).unwrap();
        assert!(cache.contains("a", MODEL));
        assert!(!cache.contains("b", MODEL));
        assert_eq!(cache.get("a", MODEL), Some(vec![1.5]));
    }

    #[test]
    fn corrupt_blob_is_a_miss_and_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(10));
        cache.put("a", MODEL, &[1.0, 2.0]).unwrap();
        std::fs::write(dir.path().join(format!("{}.bin", cache_key("a", MODEL))), [1u8, 2, 3])
            .unwrap();

        assert_eq!(cache.get("a", MODEL), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn blob_with_wrong_dims_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(10));
        cache.put("a", MODEL, &[1.0, 2.0]).unwrap();
        std::fs::write(
            dir.path().join(format!("{}.bin", cache_key("a", MODEL))),
            vec_to_blob(&[1.0]),
        )
        .unwrap();
        assert_eq!(cache.get("a", MODEL), None);
    }

    #[test]
    fn malformed_index_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "{not json").unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(10));
        assert!(cache.is_empty());
        cache.put("a", MODEL, &[1.0]).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reopening_with_smaller_budget_trims() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), CacheLimit::Entries(5));
            for (i, text) in ["a", "b", "c", "d"].iter().enumerate() {
                cache.put(text, MODEL, &[i as f32]).unwrap();
            }
        }
        let cache = open(dir.path(), CacheLimit::Entries(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("c", MODEL));
        assert!(cache.contains("d", MODEL));
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), CacheLimit::Entries(5));
        cache.put("a", MODEL, &[1.0]).unwrap();
        cache.put("b", MODEL, &[2.0]).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a", MODEL), None);
        let blobs = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().is_some_and(|x| x == "bin"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(blobs, 0);
    }
}
