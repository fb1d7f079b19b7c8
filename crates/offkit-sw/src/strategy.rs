//! Caching strategies.
//!
//! Each strategy is parameterized by a target cache namespace and runs
//! over the shared cache storage plus a [`Fetcher`]. Detached refresh
//! work is spawned, bounded by a timeout, and its failure is logged but
//! never joined or surfaced to the response already returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::spawn;
use tracing::{debug, trace, warn};
use url::Url;

use offkit_cache::{CacheEntry, CacheKey};
use offkit_common::with_timeout;
use offkit_net::{FetchError, Fetcher, Request, Response};

use crate::{SharedCaches, SwError};

/// Cache-first: serve from the namespace when possible, refreshing the
/// entry in the background; fall through to the network on a miss.
pub async fn cache_first(
    caches: &SharedCaches,
    fetcher: &Arc<dyn Fetcher>,
    cache_name: &str,
    request: &Request,
    refresh_timeout: Duration,
) -> Result<Response, SwError> {
    let key = CacheKey::new(&request.method, &request.url)?;

    if let Some(response) = lookup(caches, cache_name, &key, &request.url).await {
        trace!(url = %request.url, cache = cache_name, "cache hit, refreshing in background");
        detach(
            revalidate(
                caches.clone(),
                Arc::clone(fetcher),
                cache_name.to_string(),
                request.clone(),
            ),
            refresh_timeout,
            request.url.clone(),
        );
        return Ok(response);
    }

    let response = fetcher
        .fetch(request)
        .await
        .map_err(|e| SwError::unsatisfiable(request.url.clone(), e))?;
    if response.ok() {
        store_response(caches, cache_name, &key, &response).await;
    }
    Ok(response)
}

/// Network-first: prefer a fresh response, updating the namespace; fall
/// back to the namespace when the network fails.
pub async fn network_first(
    caches: &SharedCaches,
    fetcher: &Arc<dyn Fetcher>,
    cache_name: &str,
    request: &Request,
) -> Result<Response, SwError> {
    let key = CacheKey::new(&request.method, &request.url)?;

    match fetcher.fetch(request).await {
        Ok(response) => {
            if response.ok() {
                store_response(caches, cache_name, &key, &response).await;
            }
            Ok(response)
        }
        Err(err) => {
            debug!(url = %request.url, error = %err, "network failed, trying cache");
            lookup(caches, cache_name, &key, &request.url)
                .await
                .ok_or_else(|| SwError::unsatisfiable(request.url.clone(), err))
        }
    }
}

/// Stale-while-revalidate: the revalidation fetch starts regardless of
/// hit or miss; a hit returns immediately without waiting for it, a miss
/// waits for the network result.
pub async fn stale_while_revalidate(
    caches: &SharedCaches,
    fetcher: &Arc<dyn Fetcher>,
    cache_name: &str,
    request: &Request,
    refresh_timeout: Duration,
) -> Result<Response, SwError> {
    let key = CacheKey::new(&request.method, &request.url)?;
    let cached = lookup(caches, cache_name, &key, &request.url).await;

    let revalidation = revalidate(
        caches.clone(),
        Arc::clone(fetcher),
        cache_name.to_string(),
        request.clone(),
    );

    match cached {
        Some(response) => {
            trace!(url = %request.url, cache = cache_name, "serving stale, revalidating");
            detach(revalidation, refresh_timeout, request.url.clone());
            Ok(response)
        }
        None => revalidation
            .await
            .map_err(|e| SwError::unsatisfiable(request.url.clone(), e)),
    }
}

/// Fetch and, on success, overwrite the namespace entry.
async fn revalidate(
    caches: SharedCaches,
    fetcher: Arc<dyn Fetcher>,
    cache_name: String,
    request: Request,
) -> Result<Response, FetchError> {
    let response = fetcher.fetch(&request).await?;
    if response.ok() {
        if let Ok(key) = CacheKey::new(&request.method, &request.url) {
            store_response(&caches, &cache_name, &key, &response).await;
        }
    }
    Ok(response)
}

/// Spawn a refresh future, bounded by `timeout`, with an error sink. The
/// caller never awaits it.
fn detach(
    task: impl Future<Output = Result<Response, FetchError>> + Send + 'static,
    timeout: Duration,
    url: Url,
) {
    spawn(async move {
        match with_timeout(timeout, || task).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(url = %url, error = %err, "background refresh failed"),
            Err(err) => warn!(url = %url, error = %err, "background refresh timed out"),
        }
    });
}

async fn lookup(
    caches: &SharedCaches,
    cache_name: &str,
    key: &CacheKey,
    url: &Url,
) -> Option<Response> {
    let storage = caches.read().await;
    let entry = storage.get(cache_name)?.match_key(key)?;
    Some(response_from_entry(entry, url))
}

/// Persist a response. A failed write is logged and swallowed: the
/// response path must not be aborted by storage trouble.
pub(crate) async fn store_response(
    caches: &SharedCaches,
    cache_name: &str,
    key: &CacheKey,
    response: &Response,
) {
    let entry = entry_from_response(key, response);
    let mut storage = caches.write().await;
    if let Err(err) = storage.open(cache_name).put(key, entry) {
        warn!(cache = cache_name, error = %err, "cache write failed, serving response uncached");
    }
}

pub(crate) fn entry_from_response(key: &CacheKey, response: &Response) -> CacheEntry {
    let mut headers = hashbrown::HashMap::new();
    for (name, value) in response.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    CacheEntry::new(
        key,
        response.status.as_u16(),
        headers,
        response.body.to_vec(),
    )
}

pub(crate) fn response_from_entry(entry: &CacheEntry, url: &Url) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(url.clone(), status, headers, Bytes::from(entry.body.clone()));
    response.from_cache = true;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, shared_caches, ScriptedFetcher};
    use http::Method;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::new(&Method::GET, &Url::parse(url).unwrap()).unwrap()
    }

    async fn preload(caches: &SharedCaches, cache_name: &str, url: &str, body: &[u8]) {
        let key = key(url);
        let entry = CacheEntry::new(&key, 200, hashbrown::HashMap::new(), body.to_vec());
        caches
            .write()
            .await
            .open(cache_name)
            .put(&key, entry)
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_first_hit_returns_cached_and_refreshes() {
        let caches = shared_caches(0);
        let fetcher: Arc<ScriptedFetcher> = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();

        preload(&caches, "static-v1.0.0", "https://app.example/app.css", b"old").await;
        fetcher.respond("https://app.example/app.css", 200, b"fresh");

        let response = cache_first(
            &caches,
            &dynamic,
            "static-v1.0.0",
            &request("https://app.example/app.css"),
            TIMEOUT,
        )
        .await
        .unwrap();

        // Cached bytes come back untouched, without waiting for the network.
        assert!(response.from_cache);
        assert_eq!(response.body.as_ref(), b"old");

        // The refresh fetch is issued and overwrites the entry.
        assert!(
            eventually(|| fetcher.call_count("https://app.example/app.css") == 1).await
        );
        let k = key("https://app.example/app.css");
        let mut refreshed = false;
        for _ in 0..100 {
            let body = caches
                .read()
                .await
                .get("static-v1.0.0")
                .and_then(|c| c.match_key(&k).map(|e| e.body.clone()));
            if body == Some(b"fresh".to_vec()) {
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.respond("https://app.example/app.js", 200, b"bundle");

        let response = cache_first(
            &caches,
            &dynamic,
            "static-v1.0.0",
            &request("https://app.example/app.js"),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(!response.from_cache);
        assert_eq!(response.body.as_ref(), b"bundle");

        let stored = caches
            .read()
            .await
            .get("static-v1.0.0")
            .and_then(|c| c.match_key(&key("https://app.example/app.js")).map(|e| e.body.clone()));
        assert_eq!(stored, Some(b"bundle".to_vec()));
    }

    #[tokio::test]
    async fn test_cache_first_miss_with_network_down_is_unsatisfiable() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.fail("https://app.example/app.js");

        let result = cache_first(
            &caches,
            &dynamic,
            "static-v1.0.0",
            &request("https://app.example/app.js"),
            TIMEOUT,
        )
        .await;

        assert!(matches!(result, Err(SwError::Unsatisfiable { .. })));
    }

    #[tokio::test]
    async fn test_network_first_success_updates_cache() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.respond("https://app.example/", 200, b"<html>home</html>");

        let response = network_first(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/"),
        )
        .await
        .unwrap();

        assert!(!response.from_cache);
        assert_eq!(response.body.as_ref(), b"<html>home</html>");

        let stored = caches
            .read()
            .await
            .get("dynamic-v1.0.0")
            .and_then(|c| c.match_key(&key("https://app.example/")).map(|e| e.body.clone()));
        assert_eq!(stored, Some(b"<html>home</html>".to_vec()));
    }

    #[tokio::test]
    async fn test_network_first_failure_falls_back_to_cache() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();

        preload(&caches, "dynamic-v1.0.0", "https://app.example/", b"<html>cached</html>").await;
        fetcher.fail("https://app.example/");

        let response = network_first(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/"),
        )
        .await
        .unwrap();

        assert!(response.from_cache);
        assert_eq!(response.body.as_ref(), b"<html>cached</html>");
    }

    #[tokio::test]
    async fn test_network_first_failure_without_cache_is_unsatisfiable() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.fail("https://app.example/");

        let result = network_first(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/"),
        )
        .await;

        assert!(matches!(result, Err(SwError::Unsatisfiable { .. })));
    }

    #[tokio::test]
    async fn test_network_first_returns_non_success_without_storing() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.respond("https://app.example/gone", 404, b"not found");

        let response = network_first(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/gone"),
        )
        .await
        .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let stored = caches
            .read()
            .await
            .get("dynamic-v1.0.0")
            .and_then(|c| c.match_key(&key("https://app.example/gone")).map(|_| ()));
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_miss_waits_for_network() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();
        fetcher.respond("https://app.example/api/info", 200, b"{\"ok\":true}");

        let response = stale_while_revalidate(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/api/info"),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(!response.from_cache);
        assert_eq!(response.body.as_ref(), b"{\"ok\":true}");

        // Present for the next identical request.
        let stored = caches
            .read()
            .await
            .get("dynamic-v1.0.0")
            .and_then(|c| c.match_key(&key("https://app.example/api/info")).map(|_| ()));
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_hit_returns_stale_and_updates() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();

        preload(&caches, "dynamic-v1.0.0", "https://app.example/api/info", b"stale").await;
        fetcher.respond("https://app.example/api/info", 200, b"fresh");

        let response = stale_while_revalidate(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/api/info"),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(response.from_cache);
        assert_eq!(response.body.as_ref(), b"stale");

        assert!(
            eventually(|| fetcher.call_count("https://app.example/api/info") == 1).await
        );
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_hit_survives_network_failure() {
        let caches = shared_caches(0);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();

        preload(&caches, "dynamic-v1.0.0", "https://app.example/api/info", b"stale").await;
        fetcher.fail("https://app.example/api/info");

        let response = stale_while_revalidate(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/api/info"),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(response.body.as_ref(), b"stale");
    }

    #[tokio::test]
    async fn test_quota_failure_still_returns_response() {
        let caches = shared_caches(1);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let dynamic: Arc<dyn Fetcher> = fetcher.clone();

        preload(&caches, "dynamic-v1.0.0", "https://app.example/api/a", b"a").await;
        fetcher.respond("https://app.example/api/b", 200, b"b");

        let response = stale_while_revalidate(
            &caches,
            &dynamic,
            "dynamic-v1.0.0",
            &request("https://app.example/api/b"),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(response.body.as_ref(), b"b");
        // The write was refused; the old entry is untouched.
        assert_eq!(
            caches.read().await.get("dynamic-v1.0.0").map(|c| c.len()),
            Some(1)
        );
    }

    #[test]
    fn test_entry_response_roundtrip_preserves_headers() {
        let url = Url::parse("https://app.example/api/info").unwrap();
        let k = CacheKey::new(&Method::GET, &url).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let response = Response::new(url.clone(), StatusCode::OK, headers, Bytes::from_static(b"{}"));

        let entry = entry_from_response(&k, &response);
        let back = response_from_entry(&entry, &url);

        assert_eq!(back.status, StatusCode::OK);
        assert_eq!(back.header("content-type"), Some("application/json"));
        assert_eq!(back.body, response.body);
        assert!(back.from_cache);
    }
}
