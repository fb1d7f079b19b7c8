//! Worker lifecycle.
//!
//! Installing → Waiting → Activating → Active, superseded by the next
//! version's install. Install provisions the static namespace
//! all-or-nothing; activation purges every namespace that does not belong
//! to the current version and claims the open clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use offkit_cache::{CacheKey, WorkerVersion};
use offkit_net::{Fetcher, Request};

use crate::clients::ClientRegistry;
use crate::config::WorkerConfig;
use crate::{strategy, SharedCaches, SwError};

/// Lifecycle state of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Created, install not yet started.
    Parsed,
    /// Provisioning the static namespace.
    Installing,
    /// Installed, waiting for activation.
    Waiting,
    /// Purging stale namespaces and claiming clients.
    Activating,
    /// Controlling clients and handling requests.
    Active,
    /// Install failed or version superseded.
    Redundant,
}

/// Lifecycle notifications, emitted as transitions happen.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    StateChange {
        version: WorkerVersion,
        state: LifecycleState,
    },
    /// Open clients now belong to this version.
    ControllerChange {
        version: WorkerVersion,
        claimed: usize,
    },
}

/// Drives one worker version through its lifecycle.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    state: LifecycleState,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<WorkerConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                config,
                state: LifecycleState::Parsed,
                events,
            },
            receiver,
        )
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
        let _ = self.events.send(LifecycleEvent::StateChange {
            version: self.config.version.clone(),
            state,
        });
    }

    /// Provision the static namespace for this version.
    ///
    /// All-or-nothing: if any shell asset cannot be fetched and stored,
    /// the partially populated namespace is deleted, the worker becomes
    /// redundant, and the previous version stays in control.
    pub async fn install(
        &mut self,
        caches: &SharedCaches,
        fetcher: &Arc<dyn Fetcher>,
    ) -> Result<(), SwError> {
        if self.state != LifecycleState::Parsed {
            return Err(SwError::Lifecycle(format!(
                "cannot install from {:?}",
                self.state
            )));
        }
        self.set_state(LifecycleState::Installing);
        info!(version = %self.config.version, "installing worker");

        let static_name = self.config.static_cache();
        caches.write().await.open(&static_name);

        let shell_assets = self.config.shell_assets.clone();
        for asset in &shell_assets {
            if let Err(err) = self
                .provision_shell_asset(caches, fetcher, &static_name, asset)
                .await
            {
                caches.write().await.delete(&static_name);
                self.set_state(LifecycleState::Redundant);
                error!(asset = %asset, error = %err, "shell provisioning failed, install aborted");
                return Err(err);
            }
        }

        info!(
            cache = %static_name,
            assets = self.config.shell_assets.len(),
            "shell assets cached"
        );
        self.set_state(LifecycleState::Waiting);
        Ok(())
    }

    async fn provision_shell_asset(
        &self,
        caches: &SharedCaches,
        fetcher: &Arc<dyn Fetcher>,
        static_name: &str,
        asset: &str,
    ) -> Result<(), SwError> {
        let url = self
            .config
            .origin
            .join(asset)
            .map_err(|e| SwError::install_failed(asset, e))?;
        let request = Request::get(url);

        let response = fetcher
            .fetch(&request)
            .await
            .map_err(|e| SwError::install_failed(asset, e))?;
        if !response.ok() {
            return Err(SwError::InstallFailed {
                asset: asset.to_string(),
                source: None,
            });
        }

        let key = CacheKey::new(&request.method, &request.url)
            .map_err(|e| SwError::install_failed(asset, e))?;
        let entry = strategy::entry_from_response(&key, &response);
        caches
            .write()
            .await
            .open(static_name)
            .put(&key, entry)
            .map_err(|e| SwError::install_failed(asset, e))?;
        Ok(())
    }

    /// Take control: purge stale namespaces, then claim every open client
    /// so this version handles their requests without a reload.
    pub async fn activate(
        &mut self,
        caches: &SharedCaches,
        clients: &Arc<RwLock<ClientRegistry>>,
    ) -> Result<(), SwError> {
        if self.state != LifecycleState::Waiting {
            return Err(SwError::Lifecycle(format!(
                "cannot activate from {:?}",
                self.state
            )));
        }
        self.set_state(LifecycleState::Activating);

        let keep = [self.config.static_cache(), self.config.dynamic_cache()];
        {
            let mut storage = caches.write().await;
            let stale: Vec<String> = storage
                .keys()
                .into_iter()
                .filter(|name| !keep.iter().any(|k| k == name))
                .map(String::from)
                .collect();
            for name in stale {
                info!(cache = %name, "deleting stale cache");
                storage.delete(&name);
            }
        }

        let claimed = clients.write().await.claim(&self.config.version);
        let _ = self.events.send(LifecycleEvent::ControllerChange {
            version: self.config.version.clone(),
            claimed,
        });

        self.set_state(LifecycleState::Active);
        info!(version = %self.config.version, claimed, "worker active");
        Ok(())
    }

    /// Externally triggered: activate a waiting version immediately.
    /// A no-op when nothing is waiting.
    pub async fn skip_waiting(
        &mut self,
        caches: &SharedCaches,
        clients: &Arc<RwLock<ClientRegistry>>,
    ) -> Result<(), SwError> {
        match self.state {
            LifecycleState::Waiting => self.activate(caches, clients).await,
            _ => Ok(()),
        }
    }
}
