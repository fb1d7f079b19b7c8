//! # Offkit Cache
//!
//! Named, versioned key-value stores mapping request identity to stored
//! response payloads.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── Cache "static-v2.0.0"
//!     │       └── CacheKey → CacheEntry
//!     └── Cache "dynamic-v2.0.0"
//!             └── CacheKey → CacheEntry
//! ```
//!
//! A namespace name is `<role>-v<version>`; the version suffix changes on
//! every deployable build so that stale namespaces can be purged at
//! activation. Only GET http(s) requests are ever stored: [`CacheKey`] is
//! not constructible for anything else.

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use offkit_common::now_ms;

/// Default soft limit on entries per namespace.
pub const DEFAULT_MAX_ENTRIES: usize = 512;

// ==================== Errors ====================

/// Errors that can occur in cache-store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Not cacheable: {0}")]
    NotCacheable(String),

    #[error("Quota exceeded for cache {cache}: limit {limit}")]
    QuotaExceeded { cache: String, limit: usize },
}

// ==================== Naming ====================

/// Deployable build version driving namespace rotation (e.g. "2.0.0").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerVersion(String);

impl WorkerVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheRole {
    /// Immutable build output, provisioned at install time.
    Static,
    /// Pages and other resources cached opportunistically during fetch.
    Dynamic,
}

impl CacheRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Static => "static",
            CacheRole::Dynamic => "dynamic",
        }
    }
}

impl std::fmt::Display for CacheRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned namespace name, formatted `<role>-v<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheName {
    pub role: CacheRole,
    pub version: WorkerVersion,
}

impl CacheName {
    pub fn new(role: CacheRole, version: WorkerVersion) -> Self {
        Self { role, version }
    }

    /// Parse a namespace name back into role and version.
    ///
    /// Returns `None` for names that do not follow the scheme; activation
    /// treats those as stale and purges them.
    pub fn parse(name: &str) -> Option<Self> {
        let (role, version) = name.split_once("-v")?;
        let role = match role {
            "static" => CacheRole::Static,
            "dynamic" => CacheRole::Dynamic,
            _ => return None,
        };
        if version.is_empty() {
            return None;
        }
        Some(Self {
            role,
            version: WorkerVersion::new(version),
        })
    }
}

impl std::fmt::Display for CacheName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-v{}", self.role, self.version)
    }
}

// ==================== Keys ====================

/// Canonicalized request identity: method plus absolute URL, query string
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: Url,
}

impl CacheKey {
    /// Build a key for a request.
    ///
    /// Fails for non-GET methods and non-http(s) schemes, so nothing else
    /// can ever be stored.
    pub fn new(method: &Method, url: &Url) -> Result<Self, CacheError> {
        if *method != Method::GET {
            return Err(CacheError::NotCacheable(format!(
                "method {} is not GET",
                method
            )));
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CacheError::NotCacheable(format!(
                "scheme {} is not http(s)",
                url.scheme()
            )));
        }
        Ok(Self {
            method: method.clone(),
            url: url.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Canonical map-key form, e.g. `GET https://host/path?q=1`.
    pub fn canonical(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

// ==================== Entries ====================

/// A stored response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Storage timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    /// Create an entry for a key, stamped with the current time.
    pub fn new(
        key: &CacheKey,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: key.url.to_string(),
            method: key.method.to_string(),
            status,
            headers,
            body,
            stored_at: now_ms(),
        }
    }

    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ==================== Cache ====================

/// A single namespace.
#[derive(Debug)]
pub struct Cache {
    /// Namespace name.
    pub name: String,

    /// Soft entry limit (0 = unbounded).
    max_entries: usize,

    /// Stored entries, keyed by canonical request identity.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str, max_entries: usize) -> Self {
        Self {
            name: name.to_string(),
            max_entries,
            entries: HashMap::new(),
        }
    }

    /// Match a key against stored entries.
    pub fn match_key(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(&key.canonical())
    }

    /// Store an entry under a key.
    ///
    /// Overwrites any prior entry for the same key; a repeated put leaves
    /// exactly one entry. Fails with [`CacheError::QuotaExceeded`] when the
    /// namespace is full and the key is new — callers treat that as
    /// non-fatal and still return the response they were about to store.
    pub fn put(&mut self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let canonical = key.canonical();
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(&canonical)
        {
            return Err(CacheError::QuotaExceeded {
                cache: self.name.clone(),
                limit: self.max_entries,
            });
        }
        self.entries.insert(canonical, entry);
        Ok(())
    }

    /// Delete an entry. Returns whether it existed.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(&key.canonical()).is_some()
    }

    /// All stored canonical keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The set of all namespaces.
///
/// Mutated only during install/activate transitions and by strategy
/// writes; entry-level operations are append/overwrite, never in-place
/// mutation of stored bytes, so last-write-wins races between concurrent
/// writers of the same key are benign.
#[derive(Debug)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    max_entries_per_cache: usize,
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_MAX_ENTRIES)
    }

    /// Create storage with a per-namespace entry limit (0 = unbounded).
    pub fn with_quota(max_entries_per_cache: usize) -> Self {
        Self {
            caches: HashMap::new(),
            max_entries_per_cache,
        }
    }

    /// Open a namespace, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let quota = self.max_entries_per_cache;
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name, quota))
    }

    /// Get a namespace without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a namespace exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a namespace and everything in it.
    pub fn delete(&mut self, name: &str) -> bool {
        let deleted = self.caches.remove(name).is_some();
        if deleted {
            debug!(cache = name, "namespace deleted");
        }
        deleted
    }

    /// All namespace names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }

    /// Match a key across all namespaces.
    pub fn match_key(&self, key: &CacheKey) -> Option<&CacheEntry> {
        for cache in self.caches.values() {
            if let Some(entry) = cache.match_key(key) {
                return Some(entry);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> CacheKey {
        CacheKey::new(&Method::GET, &Url::parse(url).unwrap()).unwrap()
    }

    fn entry(key: &CacheKey, body: &[u8]) -> CacheEntry {
        CacheEntry::new(key, 200, HashMap::new(), body.to_vec())
    }

    #[test]
    fn test_cache_name_format() {
        let name = CacheName::new(CacheRole::Static, WorkerVersion::new("2.0.0"));
        assert_eq!(name.to_string(), "static-v2.0.0");

        let name = CacheName::new(CacheRole::Dynamic, WorkerVersion::new("2.0.0"));
        assert_eq!(name.to_string(), "dynamic-v2.0.0");
    }

    #[test]
    fn test_cache_name_parse_roundtrip() {
        let parsed = CacheName::parse("static-v2.0.0").unwrap();
        assert_eq!(parsed.role, CacheRole::Static);
        assert_eq!(parsed.version.as_str(), "2.0.0");
        assert_eq!(parsed.to_string(), "static-v2.0.0");

        assert!(CacheName::parse("old-cache").is_none());
        assert!(CacheName::parse("precache-v1").is_none());
        assert!(CacheName::parse("static-v").is_none());
    }

    #[test]
    fn test_cache_key_includes_query() {
        let a = key("https://example.com/api/info?page=1");
        let b = key("https://example.com/api/info?page=2");
        assert_ne!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "GET https://example.com/api/info?page=1");
    }

    #[test]
    fn test_cache_key_rejects_non_get() {
        let url = Url::parse("https://example.com/api/info").unwrap();
        let result = CacheKey::new(&Method::POST, &url);
        assert!(matches!(result, Err(CacheError::NotCacheable(_))));
    }

    #[test]
    fn test_cache_key_rejects_non_http_scheme() {
        let url = Url::parse("chrome-extension://abcdef/script.js").unwrap();
        let result = CacheKey::new(&Method::GET, &url);
        assert!(matches!(result, Err(CacheError::NotCacheable(_))));
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = Cache::new("static-v1.0.0", 0);
        let k = key("https://example.com/app.css");

        assert!(cache.match_key(&k).is_none());
        cache.put(&k, entry(&k, b"body { }")).unwrap();

        let found = cache.match_key(&k).unwrap();
        assert_eq!(found.body, b"body { }");
        assert_eq!(found.status, 200);
    }

    #[test]
    fn test_put_is_idempotent_overwrite() {
        let mut cache = Cache::new("dynamic-v1.0.0", 0);
        let k = key("https://example.com/api/info");

        cache.put(&k, entry(&k, b"old")).unwrap();
        cache.put(&k, entry(&k, b"new")).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_key(&k).unwrap().body, b"new");
    }

    #[test]
    fn test_quota_exceeded_keeps_existing_entries() {
        let mut cache = Cache::new("dynamic-v1.0.0", 2);
        let a = key("https://example.com/a");
        let b = key("https://example.com/b");
        let c = key("https://example.com/c");

        cache.put(&a, entry(&a, b"a")).unwrap();
        cache.put(&b, entry(&b, b"b")).unwrap();

        let result = cache.put(&c, entry(&c, b"c"));
        assert!(matches!(result, Err(CacheError::QuotaExceeded { .. })));
        assert_eq!(cache.len(), 2);

        // Overwriting an existing key still works at quota.
        cache.put(&a, entry(&a, b"a2")).unwrap();
        assert_eq!(cache.match_key(&a).unwrap().body, b"a2");
    }

    #[test]
    fn test_delete_entry() {
        let mut cache = Cache::new("static-v1.0.0", 0);
        let k = key("https://example.com/app.js");

        cache.put(&k, entry(&k, b"js")).unwrap();
        assert!(cache.delete(&k));
        assert!(!cache.delete(&k));
        assert!(cache.match_key(&k).is_none());
    }

    #[test]
    fn test_storage_open_has_delete() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("static-v1.0.0"));
        storage.open("static-v1.0.0");
        assert!(storage.has("static-v1.0.0"));

        assert!(storage.delete("static-v1.0.0"));
        assert!(!storage.has("static-v1.0.0"));
    }

    #[test]
    fn test_storage_match_across_namespaces() {
        let mut storage = CacheStorage::new();
        let k = key("https://example.com/offline");

        storage
            .open("static-v1.0.0")
            .put(&k, entry(&k, b"<html>"))
            .unwrap();

        assert!(storage.match_key(&k).is_some());

        let missing = key("https://example.com/nowhere");
        assert!(storage.match_key(&missing).is_none());
    }

    #[test]
    fn test_entry_header_lookup_is_case_insensitive() {
        let k = key("https://example.com/offline");
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        let e = CacheEntry::new(&k, 200, headers, Vec::new());

        assert_eq!(e.header("content-type"), Some("text/html"));
        assert_eq!(e.header("x-missing"), None);
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let k = key("https://example.com/manifest.json");
        let e = entry(&k, b"{}");
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, e.url);
        assert_eq!(back.body, e.body);
    }
}
