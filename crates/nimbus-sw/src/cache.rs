//! Cache buckets and stored responses.

use bytes::Bytes;
use hashbrown::HashMap;
use http::HeaderMap;
use nimbus_net::{Request, Response};
use serde::{Deserialize, Serialize};
use url::Url;

/// Lookup key for a request URL: the absolute URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

fn header_map_to_strings(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the lookup key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a network response under the request's key.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        Self {
            url: cache_key(&request.url),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers: header_map_to_strings(&response.headers),
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }
}

// ==================== Cache ====================

/// A single named bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name (generation tag).
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry under its own URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Add every entry.
    pub fn put_all(&mut self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.put(entry);
        }
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// All entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Every bucket, keyed by name.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }
}

// ==================== Fetch Response ====================

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Exact cache hit.
    Cache,
    /// Live network response.
    Network,
    /// Fallback page substituted for a network failure.
    Fallback,
}

/// Response handed back for an intercepted fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Origin of the response.
    pub source: ResponseSource,
}

impl FetchResponse {
    /// Build a response from a stored entry.
    pub fn from_entry(entry: CacheEntry, source: ResponseSource) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: Bytes::from(entry.body),
            source,
        }
    }

    /// Pass a network response through unmodified.
    pub fn from_network(response: Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: header_map_to_strings(&response.headers),
            body: response.body,
            source: ResponseSource::Network,
        }
    }

    /// Whether this came out of the cache, fallback included.
    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}
