//! Local persistent fallback for when the remote store is unreachable.
//!
//! Entries are [`CacheEntry`] records keyed by the document key. Two
//! implementations are provided: [`MemoryCache`] for tests and short-lived
//! processes, and [`FileCache`], one JSON file per key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tether_engine::CacheEntry;

use crate::CacheError;

/// Key/value store that survives losing the remote store.
#[async_trait]
pub trait LocalCache: Send + Sync + 'static {
    /// The entry for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry` under its own key, replacing any previous entry.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// In-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }
}

/// Cache storing one pretty-printed JSON file per document.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '~',
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl LocalCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let json = match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry = CacheEntry::from_json(&json)?;
        // Two keys can share a sanitized file name; never hand back the other one.
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, entry.to_json_pretty()?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_cache_roundtrip() {
        let cache = MemoryCache::new();
        assert!(cache.get("music/u1_w1").await.unwrap().is_none());

        cache
            .set(CacheEntry::new("music/u1_w1", json!({"categories": []}), 10))
            .await
            .unwrap();
        cache
            .set(CacheEntry::new("music/u1_w1", json!({"categories": [1]}), 20))
            .await
            .unwrap();

        let entry = cache.get("music/u1_w1").await.unwrap().unwrap();
        assert_eq!(entry.saved_at, 20);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn file_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested"));

        assert!(cache.get("dashboard/u1_w1").await.unwrap().is_none());

        let entry = CacheEntry::new("dashboard/u1_w1", json!({"isLocked": true}), 99);
        cache.set(entry.clone()).await.unwrap();

        assert_eq!(cache.get("dashboard/u1_w1").await.unwrap(), Some(entry));
        assert!(dir.path().join("nested/dashboard~u1_w1.json").exists());
    }

    #[tokio::test]
    async fn file_cache_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        std::fs::write(dir.path().join("k.json"), "{ not json").unwrap();

        assert!(matches!(cache.get("k").await, Err(CacheError::Entry(_))));
    }

    #[tokio::test]
    async fn file_cache_ignores_colliding_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());

        cache
            .set(CacheEntry::new("a/b", json!({}), 1))
            .await
            .unwrap();

        assert!(cache.get("a:b").await.unwrap().is_none());
        assert!(cache.get("a/b").await.unwrap().is_some());
    }
}
