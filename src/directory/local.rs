//! In-process activation directory.
//!
//! A single table lock guards create-if-absent. An entry stays in the table
//! until its drain completes, so a key never has two reachable activations:
//! resolving a key whose activation is still draining waits for the drain and
//! only then creates the replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activation::{
    Activation, ActivationDeps, ActivationHandle, ActivationInfo, ActivationState,
    DeactivationReason, Heartbeat, IdleEvictionPolicy,
};
use crate::clock::Clock;
use crate::config::HostConfig;
use crate::directory::{ActivationDirectory, DeactivationListener};
use crate::error::DirectoryError;

/// Keyed table of live activations.
pub struct LocalDirectory {
    table: Mutex<HashMap<String, ActivationHandle>>,
    clock: Arc<dyn Clock>,
    heartbeat: Arc<dyn Heartbeat>,
    policy: IdleEvictionPolicy,
    heartbeat_interval: Duration,
    mailbox_capacity: usize,
    closed: AtomicBool,
    me: Weak<LocalDirectory>,
}

impl LocalDirectory {
    /// Create a directory. Activations it creates report back to it when they
    /// drain. They only hold it weakly: dropping the last `Arc` drops the table,
    /// which closes every mailbox it owns.
    pub fn new(
        config: &HostConfig,
        clock: Arc<dyn Clock>,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            table: Mutex::new(HashMap::new()),
            clock,
            heartbeat,
            policy: IdleEvictionPolicy::new(config.idle_threshold),
            heartbeat_interval: config.heartbeat_interval,
            mailbox_capacity: config.mailbox_capacity,
            closed: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    fn deps(&self) -> ActivationDeps {
        ActivationDeps {
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            heartbeat: Arc::clone(&self.heartbeat),
            heartbeat_interval: self.heartbeat_interval,
            mailbox_capacity: self.mailbox_capacity,
            listener: self.me.clone(),
        }
    }

    /// Current entry for `key`, without creating one.
    pub async fn get(&self, key: &str) -> Option<ActivationHandle> {
        self.table.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Snapshot of every entry, ordered by key.
    pub async fn list(&self) -> Vec<ActivationInfo> {
        let mut infos: Vec<ActivationInfo> = self
            .table
            .lock()
            .await
            .values()
            .map(ActivationHandle::info)
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Stop accepting resolutions and drain every activation concurrently.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<ActivationHandle> = self.table.lock().await.values().cloned().collect();

        info!(count = handles.len(), "Draining activations for shutdown");
        join_all(
            handles
                .iter()
                .map(|h| h.deactivate(DeactivationReason::HostShutdown)),
        )
        .await;
    }
}

#[async_trait]
impl ActivationDirectory for LocalDirectory {
    async fn resolve_or_create(&self, key: &str) -> Result<ActivationHandle, DirectoryError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(DirectoryError::Unavailable {
                    reason: "directory is shut down".to_string(),
                });
            }

            let mut table = self.table.lock().await;
            if let Some(existing) = table.get(key) {
                match existing.state() {
                    state if state.is_serving() && !existing.is_closed() => {
                        return Ok(existing.clone());
                    }
                    ActivationState::Deactivating if !existing.is_closed() => {
                        let draining = existing.clone();
                        drop(table);
                        debug!(key = %key, activation_id = %draining.id(), "Waiting for drain before reactivating");
                        draining.terminated().await;
                        continue;
                    }
                    ActivationState::Terminated => {
                        // Normally removed by `on_deactivated`.
                        table.remove(key);
                    }
                    state => {
                        warn!(
                            key = %key,
                            activation_id = %existing.id(),
                            %state,
                            "Discarding activation whose turn loop is gone"
                        );
                        table.remove(key);
                    }
                }
            }

            let handle = Activation::activate(key, self.deps());
            table.insert(key.to_string(), handle.clone());
            return Ok(handle);
        }
    }
}

#[async_trait]
impl DeactivationListener for LocalDirectory {
    async fn on_deactivated(&self, key: &str, id: Uuid) {
        let mut table = self.table.lock().await;
        if table.get(key).is_some_and(|h| h.id() == id) {
            table.remove(key);
            debug!(key = %key, activation_id = %id, "Removed drained activation");
        }
    }
}
