//! Scripted fetch backends for exercising the engine without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use tokio::sync::RwLock;

use offkit_cache::CacheStorage;
use offkit_net::{FetchError, Fetcher, Request, Response};

use crate::SharedCaches;

/// Shared cache storage with the given per-namespace quota (0 =
/// unbounded).
pub fn shared_caches(quota: usize) -> SharedCaches {
    Arc::new(RwLock::new(CacheStorage::with_quota(quota)))
}

#[derive(Clone)]
enum Script {
    Respond { status: u16, body: Vec<u8> },
    Fail,
}

/// A [`Fetcher`] that serves scripted responses per URL and records every
/// call, so tests can observe background refreshes.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for a URL.
    pub fn respond(&self, url: &str, status: u16, body: &[u8]) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Script::Respond {
                status,
                body: body.to_vec(),
            },
        );
    }

    /// Script a network failure for a URL.
    pub fn fail(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Script::Fail);
    }

    /// Every URL fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times a URL was fetched.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        let script = self.routes.lock().unwrap().get(&url).cloned();
        match script {
            Some(Script::Respond { status, body }) => Ok(Response::new(
                request.url.clone(),
                StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                HeaderMap::new(),
                Bytes::from(body),
            )),
            Some(Script::Fail) | None => {
                Err(FetchError::RequestFailed("network unreachable".to_string()))
            }
        }
    }
}

/// Poll a condition until it holds, for up to half a second. Background
/// refreshes are detached, so tests wait for their effects this way.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
