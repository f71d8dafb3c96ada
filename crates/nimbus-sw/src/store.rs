//! Cache storage backends.
//!
//! A bucket is only ever written through [`CacheStore::put_all`], which
//! commits a whole batch or nothing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::cache::{Cache, CacheEntry, CacheStorage};
use crate::ServiceWorkerError;

const BUCKET_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Named buckets of cached responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// All bucket names, sorted.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Whether a bucket exists.
    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Create the bucket if needed and add every entry in one commit.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>)
        -> Result<(), ServiceWorkerError>;

    /// Exact key lookup in one bucket.
    async fn match_entry(
        &self,
        name: &str,
        key: &str,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Every entry of a bucket; empty when the bucket does not exist.
    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, ServiceWorkerError>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;
}

// ==================== Memory ====================

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    storage: RwLock<CacheStorage>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing storage.
    pub fn from_storage(storage: CacheStorage) -> Self {
        Self {
            storage: RwLock::new(storage),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let storage = self.storage.read().await;
        Ok(storage.keys().into_iter().map(str::to_string).collect())
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.storage.read().await.has(name))
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError> {
        self.storage.write().await.open(name).put_all(entries);
        Ok(())
    }

    async fn match_entry(
        &self,
        name: &str,
        key: &str,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, ServiceWorkerError> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(name)
            .map(|cache| cache.entries().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.storage.write().await.delete(name))
    }
}

// ==================== File ====================

/// One JSON document per bucket inside a directory.
///
/// File names are the url-encoded bucket name. Writes go to a `.tmp` file
/// first and are renamed into place.
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    /// Open (and create) the storage directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ServiceWorkerError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        debug!(dir = %dir.display(), "Opened file cache store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", urlencoding::encode(name), BUCKET_EXTENSION))
    }

    async fn load(&self, name: &str) -> Result<Option<Cache>, ServiceWorkerError> {
        let path = self.bucket_path(name);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let cache = serde_json::from_slice(&raw).map_err(|e| {
            ServiceWorkerError::CacheError(format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(cache))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(name) => names.push(name.into_owned()),
                Err(_) => trace!(path = %path.display(), "Skipping undecodable bucket file"),
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        let path = self.bucket_path(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError> {
        let _guard = self.write_lock.lock().await;

        let mut cache = self.load(name).await?.unwrap_or_else(|| Cache::new(name));
        cache.put_all(entries);

        let encoded = serde_json::to_vec(&cache)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        let path = self.bucket_path(name);
        let tmp = path.with_extension(format!("{}.{}", BUCKET_EXTENSION, TEMP_EXTENSION));
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(bucket = name, entries = cache.len(), "Bucket committed");
        Ok(())
    }

    async fn match_entry(
        &self,
        name: &str,
        key: &str,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .load(name)
            .await?
            .and_then(|cache| cache.match_request(key).cloned()))
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .load(name)
            .await?
            .map(|cache| cache.entries().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        let _guard = self.write_lock.lock().await;
        let path = self.bucket_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ServiceWorkerError {
    ServiceWorkerError::CacheError(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    fn entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            cached_at: 1,
        }
    }

    async fn exercise(store: &dyn CacheStore) {
        assert!(store.keys().await.unwrap().is_empty());
        assert!(!store.has("v1").await.unwrap());

        store
            .put_all("v1", vec![entry("https://a/fallback.html", "<p>off</p>")])
            .await
            .unwrap();
        store
            .put_all("v2", vec![entry("https://a/x.js", "x")])
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["v1", "v2"]);
        assert!(store.has("v1").await.unwrap());

        let hit = store
            .match_entry("v1", "https://a/fallback.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"<p>off</p>");
        assert!(store.match_entry("v2", "https://a/fallback.html").await.unwrap().is_none());
        assert!(store.match_entry("v9", "https://a/fallback.html").await.unwrap().is_none());

        store
            .put_all("v1", vec![entry("https://a/fallback-js.js", "js")])
            .await
            .unwrap();
        assert_eq!(store.entries("v1").await.unwrap().len(), 2);
        assert!(store.entries("v9").await.unwrap().is_empty());

        assert!(store.delete("v2").await.unwrap());
        assert!(!store.delete("v2").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryCacheStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path().join("buckets")).await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCacheStore::open(dir.path()).await.unwrap();
            store
                .put_all("v1", vec![entry("https://a/fallback.html", "off")])
                .await
                .unwrap();
        }

        let store = FileCacheStore::open(dir.path()).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["v1"]);
        assert!(store
            .match_entry("v1", "https://a/fallback.html")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_file_store_encodes_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();

        store
            .put_all("weather/v1 beta", vec![entry("https://a/", "")])
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["weather/v1 beta"]);
        assert!(store.bucket_path("weather/v1 beta").starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_file_store_lists_dot_prefixed_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();

        store.put_all(".v0", vec![entry("https://a/", "old")]).await.unwrap();
        store.put_all("v1", vec![entry("https://a/", "new")]).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec![".v0", "v1"]);
        assert!(store.delete(".v0").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_file_store_ignores_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("v1.json.tmp"), "{").unwrap();

        let store = FileCacheStore::open(dir.path()).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_bucket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.json"), "not json").unwrap();

        let store = FileCacheStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.match_entry("v1", "https://a/").await,
            Err(ServiceWorkerError::CacheError(_))
        ));
    }
}
