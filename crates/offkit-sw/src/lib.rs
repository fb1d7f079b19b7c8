//! # Offkit SW
//!
//! Request routing, caching strategies, and worker lifecycle for the
//! offkit offline-caching engine.
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerEngine
//!     │
//!     ├── dispatch(WorkerEvent)          explicit event table
//!     │       ├── Install / Activate  →  LifecycleController
//!     │       ├── Fetch               →  classify → strategy → fallback
//!     │       ├── Message             →  skip-waiting / version reply
//!     │       ├── Sync                →  client broadcast
//!     │       └── Push                →  notification broadcast
//!     │
//!     ├── CacheStorage (shared)          static-v<ver> / dynamic-v<ver>
//!     ├── Fetcher (trait object)         network boundary
//!     └── ClientRegistry                 open client contexts
//! ```
//!
//! Every handler is async and yields at each cache or network operation.
//! Concurrent requests are independent; cache writes are idempotent
//! overwrites keyed by canonical request identity, so last write wins.

use std::sync::Arc;

use http::Method;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use offkit_cache::{CacheError, CacheKey, CacheStorage};
use offkit_common::now_ms;
use offkit_net::{FetchError, Fetcher, Request, Response};

pub mod classify;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod message;
pub mod offline;
pub mod strategy;
pub mod testing;

pub use classify::{classify, RouteClass};
pub use clients::{Client, ClientId, ClientRegistry};
pub use config::{WorkerConfig, DEFAULT_SHELL_ASSETS};
pub use lifecycle::{LifecycleController, LifecycleEvent, LifecycleState};
pub use message::{ClientMessage, ControlMessage, Notification, VersionInfo};
pub use offline::offline_page;

/// Background-sync tag that triggers the device-info broadcast.
pub const DEVICE_INFO_SYNC_TAG: &str = "device-info-sync";

/// Cache storage shared between the request path and the lifecycle.
pub type SharedCaches = Arc<RwLock<CacheStorage>>;

// ==================== Errors ====================

/// Errors that can occur in the worker engine.
#[derive(Error, Debug)]
pub enum SwError {
    /// No cache entry and no network: the request cannot be satisfied.
    #[error("request unsatisfiable: {url}")]
    Unsatisfiable {
        url: Url,
        #[source]
        source: FetchError,
    },

    /// Shell provisioning failed; the version must not activate.
    #[error("shell provisioning failed for {asset}")]
    InstallFailed {
        asset: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl SwError {
    pub(crate) fn unsatisfiable(url: Url, source: FetchError) -> Self {
        Self::Unsatisfiable { url, source }
    }

    pub(crate) fn install_failed<E: std::error::Error + Send + Sync + 'static>(
        asset: &str,
        source: E,
    ) -> Self {
        Self::InstallFailed {
            asset: asset.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

// ==================== Events ====================

/// An event from the hosting runtime.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Provision this version's caches.
    Install,
    /// Take control from the previous version.
    Activate,
    /// An intercepted request.
    Fetch(Request),
    /// A control message from a client, with an optional reply channel.
    Message {
        data: ControlMessage,
        reply: Option<oneshot::Sender<VersionInfo>>,
    },
    /// A background sync completed.
    Sync { tag: String },
    /// A push event, with its payload text when one was carried.
    Push { payload: Option<String> },
}

/// Decision for one intercepted request.
#[derive(Debug, Clone)]
pub enum FetchDecision {
    /// Respond with this.
    Respond(Response),
    /// Decline to intercept; the request passes through natively.
    Passthrough,
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed,
    Activated,
    Fetch(FetchDecision),
    MessageHandled,
    SyncBroadcast { delivered: usize },
    Notified { delivered: usize },
}

// ==================== Engine ====================

/// The worker engine: one instance per worker version.
pub struct ServiceWorkerEngine {
    config: Arc<WorkerConfig>,
    caches: SharedCaches,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<ClientRegistry>>,
    lifecycle: Mutex<LifecycleController>,
}

impl ServiceWorkerEngine {
    /// Create an engine; the returned receiver observes lifecycle
    /// transitions.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let config = Arc::new(config);
        let caches: SharedCaches = Arc::new(RwLock::new(CacheStorage::with_quota(
            config.max_entries_per_cache,
        )));
        let (lifecycle, events) = LifecycleController::new(Arc::clone(&config));
        info!(version = %config.version, "worker engine created");

        (
            Self {
                config,
                caches,
                fetcher,
                clients: Arc::new(RwLock::new(ClientRegistry::new())),
                lifecycle: Mutex::new(lifecycle),
            },
            events,
        )
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Handle to the shared cache storage.
    pub fn caches(&self) -> SharedCaches {
        Arc::clone(&self.caches)
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state()
    }

    /// Register a client context; the receiver observes broadcasts.
    pub async fn connect_client(
        &self,
        url: Url,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        self.clients.write().await.connect(url)
    }

    pub async fn disconnect_client(&self, id: ClientId) -> bool {
        self.clients.write().await.disconnect(id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, SwError> {
        match event {
            WorkerEvent::Install => {
                self.lifecycle
                    .lock()
                    .await
                    .install(&self.caches, &self.fetcher)
                    .await?;
                Ok(EventOutcome::Installed)
            }
            WorkerEvent::Activate => {
                self.lifecycle
                    .lock()
                    .await
                    .activate(&self.caches, &self.clients)
                    .await?;
                Ok(EventOutcome::Activated)
            }
            WorkerEvent::Fetch(request) => {
                Ok(EventOutcome::Fetch(self.handle_fetch(request).await?))
            }
            WorkerEvent::Message { data, reply } => self.handle_message(data, reply).await,
            WorkerEvent::Sync { tag } => Ok(self.handle_sync(&tag).await),
            WorkerEvent::Push { payload } => Ok(self.handle_push(payload).await),
        }
    }

    /// Produce exactly one decision for an intercepted request.
    ///
    /// Non-GET and non-http(s) requests pass through natively. Everything
    /// else is classified and served by its strategy; an unsatisfiable
    /// navigation resolves to the offline document.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchDecision, SwError> {
        if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
            trace!(method = %request.method, url = %request.url, "declining to intercept");
            return Ok(FetchDecision::Passthrough);
        }

        let route = classify(&request);
        debug!(url = %request.url, ?route, "routing request");

        let result = match route {
            RouteClass::StaticAsset => {
                strategy::cache_first(
                    &self.caches,
                    &self.fetcher,
                    &self.config.static_cache(),
                    &request,
                    self.config.background_fetch_timeout,
                )
                .await
            }
            RouteClass::Navigation => {
                strategy::network_first(
                    &self.caches,
                    &self.fetcher,
                    &self.config.dynamic_cache(),
                    &request,
                )
                .await
            }
            RouteClass::Other => {
                strategy::stale_while_revalidate(
                    &self.caches,
                    &self.fetcher,
                    &self.config.dynamic_cache(),
                    &request,
                    self.config.background_fetch_timeout,
                )
                .await
            }
        };

        match result {
            Ok(response) => Ok(FetchDecision::Respond(response)),
            Err(err) if route == RouteClass::Navigation => {
                warn!(url = %request.url, error = %err, "navigation unsatisfiable, serving offline document");
                Ok(FetchDecision::Respond(
                    offline::offline_page(&self.caches, &self.config).await,
                ))
            }
            Err(err) => {
                // Last resort: any namespace may still hold the resource.
                if let Ok(key) = CacheKey::new(&request.method, &request.url) {
                    let storage = self.caches.read().await;
                    if let Some(entry) = storage.match_key(&key) {
                        debug!(url = %request.url, "served from another namespace after failure");
                        return Ok(FetchDecision::Respond(strategy::response_from_entry(
                            entry,
                            &request.url,
                        )));
                    }
                }
                Err(err)
            }
        }
    }

    async fn handle_message(
        &self,
        data: ControlMessage,
        reply: Option<oneshot::Sender<VersionInfo>>,
    ) -> Result<EventOutcome, SwError> {
        match data {
            ControlMessage::SkipWaiting => {
                self.lifecycle
                    .lock()
                    .await
                    .skip_waiting(&self.caches, &self.clients)
                    .await?;
                Ok(EventOutcome::MessageHandled)
            }
            ControlMessage::GetVersion => {
                let info = VersionInfo {
                    version: self.config.generation(),
                    timestamp: now_ms(),
                };
                if let Some(reply) = reply {
                    if reply.send(info).is_err() {
                        debug!("version reply receiver dropped");
                    }
                }
                Ok(EventOutcome::MessageHandled)
            }
        }
    }

    async fn handle_sync(&self, tag: &str) -> EventOutcome {
        if tag != DEVICE_INFO_SYNC_TAG {
            debug!(tag, "ignoring unknown sync tag");
            return EventOutcome::SyncBroadcast { delivered: 0 };
        }
        let message = ClientMessage::SyncDeviceInfo {
            timestamp: now_ms(),
        };
        let delivered = self.clients.read().await.broadcast(&message);
        info!(delivered, "device info sync broadcast");
        EventOutcome::SyncBroadcast { delivered }
    }

    async fn handle_push(&self, payload: Option<String>) -> EventOutcome {
        let notification = Notification::device_info(payload);
        let delivered = self
            .clients
            .read()
            .await
            .broadcast(&ClientMessage::Notify { notification });
        EventOutcome::Notified { delivered }
    }
}
