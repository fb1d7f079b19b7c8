//! Worker configuration.
//!
//! All cache names, the shell-asset list, and timing knobs are carried in
//! an explicit record handed to the engine at construction, never read
//! from ambient globals.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use offkit_cache::{CacheName, CacheRole, WorkerVersion, DEFAULT_MAX_ENTRIES};

/// Shell assets pre-populated at install time: the root document, the
/// offline document, and the manifest/icon resources.
pub const DEFAULT_SHELL_ASSETS: &[&str] = &[
    "/",
    "/offline",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deployable build version; changes on every build to rotate caches.
    pub version: WorkerVersion,

    /// Origin against which shell-asset paths are resolved.
    pub origin: Url,

    /// Paths fetched and stored during install, all-or-nothing.
    pub shell_assets: Vec<String>,

    /// Path of the pre-cached offline document.
    pub offline_path: String,

    /// Bound on detached refresh/revalidation fetches.
    pub background_fetch_timeout: Duration,

    /// Soft entry limit per cache namespace (0 = unbounded).
    pub max_entries_per_cache: usize,
}

impl WorkerConfig {
    /// Create a configuration for a version served from `origin`, with the
    /// standard shell-asset list.
    pub fn new(origin: Url, version: WorkerVersion) -> Self {
        Self {
            version,
            origin,
            shell_assets: DEFAULT_SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            offline_path: "/offline".to_string(),
            background_fetch_timeout: Duration::from_secs(30),
            max_entries_per_cache: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Name of this version's static namespace, e.g. `static-v2.0.0`.
    pub fn static_cache(&self) -> String {
        CacheName::new(CacheRole::Static, self.version.clone()).to_string()
    }

    /// Name of this version's dynamic namespace, e.g. `dynamic-v2.0.0`.
    pub fn dynamic_cache(&self) -> String {
        CacheName::new(CacheRole::Dynamic, self.version.clone()).to_string()
    }

    /// The cache-generation identifier reported to clients, e.g.
    /// `app-v2.0.0`.
    pub fn generation(&self) -> String {
        format!("app-v{}", self.version)
    }

    /// Absolute URL of the offline document.
    pub fn offline_url(&self) -> Url {
        self.origin
            .join(&self.offline_path)
            .unwrap_or_else(|_| self.origin.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig::new(
            Url::parse("https://app.example").unwrap(),
            WorkerVersion::new("2.0.0"),
        )
    }

    #[test]
    fn test_cache_names() {
        let config = config();
        assert_eq!(config.static_cache(), "static-v2.0.0");
        assert_eq!(config.dynamic_cache(), "dynamic-v2.0.0");
        assert_eq!(config.generation(), "app-v2.0.0");
    }

    #[test]
    fn test_default_shell_assets_include_offline_document() {
        let config = config();
        assert!(config.shell_assets.iter().any(|a| a == "/offline"));
        assert!(config.shell_assets.iter().any(|a| a == "/"));
    }

    #[test]
    fn test_offline_url() {
        let config = config();
        assert_eq!(config.offline_url().as_str(), "https://app.example/offline");
    }
}
