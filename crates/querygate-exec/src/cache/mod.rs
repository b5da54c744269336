//! Connection cache: at most one live store handle per target.
//!
//! The outer map only hands out per-target slots; establishment and probing
//! happen under the slot's own lock, so distinct targets never wait on each
//! other and concurrent callers for one target share a single connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::registry::TargetRegistry;
use crate::store::{StoreConnector, StoreHandle};
use crate::types::{ExecError, ExecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Ready,
    Broken,
}

struct CacheEntry {
    target_id: String,
    handle: Arc<dyn StoreHandle>,
    state: EntryState,
    last_used: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Lazily established, reused store handles keyed by target id.
pub struct ConnectionCache {
    registry: Arc<dyn TargetRegistry>,
    connector: Arc<dyn StoreConnector>,
    connect_timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConnectionCache {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        connector: Arc<dyn StoreConnector>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            connect_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return a live handle for `target_id`, establishing one if needed.
    pub async fn acquire(&self, target_id: &str) -> ExecResult<Arc<dyn StoreHandle>> {
        loop {
            let slot = self.slot(target_id).await;
            let mut guard = slot.lock().await;

            // close() may have evicted this slot while we waited for it.
            if !self.is_current(target_id, &slot).await {
                continue;
            }

            if let Some(entry) = guard.as_mut() {
                if entry.state == EntryState::Ready && entry.handle.is_alive().await {
                    entry.last_used = Instant::now();
                    return Ok(entry.handle.clone());
                }
                entry.state = EntryState::Broken;
                tracing::warn!(
                    "Connection to '{}' is broken (idle {:?}), reconnecting",
                    entry.target_id,
                    entry.last_used.elapsed()
                );
                entry.handle.close().await;
                *guard = None;
            }

            let handle = match self.establish(target_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.evict_if_current(target_id, &slot).await;
                    return Err(e);
                }
            };
            *guard = Some(CacheEntry {
                target_id: target_id.to_string(),
                handle: handle.clone(),
                state: EntryState::Ready,
                last_used: Instant::now(),
            });
            return Ok(handle);
        }
    }

    /// Close and evict one target's handle. Returns whether one was cached.
    pub async fn close(&self, target_id: &str) -> bool {
        let slot = self.slots.lock().await.remove(target_id);
        let Some(slot) = slot else {
            return false;
        };
        let entry = slot.lock().await.take();
        match entry {
            Some(entry) => {
                entry.handle.close().await;
                tracing::info!("Closed connection to '{target_id}'");
                true
            }
            None => false,
        }
    }

    /// Close and evict every cached handle.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        let mut closed = 0usize;
        for (_, slot) in drained {
            if let Some(entry) = slot.lock().await.take() {
                entry.handle.close().await;
                closed += 1;
            }
        }
        tracing::info!("Closed {closed} connection(s)");
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a handle is currently cached for `target_id`.
    pub async fn contains(&self, target_id: &str) -> bool {
        let slot = self.slots.lock().await.get(target_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    async fn slot(&self, target_id: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(target_id.to_string())
            .or_default()
            .clone()
    }

    async fn is_current(&self, target_id: &str, slot: &Slot) -> bool {
        self.slots
            .lock()
            .await
            .get(target_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop an empty slot so failed target ids do not accumulate.
    async fn evict_if_current(&self, target_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(target_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(target_id);
        }
    }

    /// Resolve and connect. Nothing is cached on failure.
    async fn establish(&self, target_id: &str) -> ExecResult<Arc<dyn StoreHandle>> {
        let target = self
            .registry
            .resolve_target(target_id)
            .await
            .map_err(|e| ExecError::unavailable(target_id, e))?;

        if !target.active {
            return Err(ExecError::unavailable(target_id, "target is not active"));
        }

        let connect = self.connector.connect(&target, self.connect_timeout);
        let handle = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::error!("Failed to connect to '{target_id}': {e}");
                return Err(ExecError::unavailable(target_id, e));
            }
            Err(_) => {
                tracing::error!(
                    "Connecting to '{target_id}' timed out after {:?}",
                    self.connect_timeout
                );
                return Err(ExecError::unavailable(
                    target_id,
                    format!(
                        "connect timed out after {} ms",
                        self.connect_timeout.as_millis()
                    ),
                ));
            }
        };

        tracing::info!(
            "Connected to '{target_id}' at {} ({})",
            target.redacted_address(),
            target.default_namespace
        );
        Ok(handle)
    }
}
