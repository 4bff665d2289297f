//! Directory cache for installed servlets.
//!
//! Holds the current snapshot of installs plus a derived tool index
//! (tool name -> owning servlet). A read past the TTL triggers a full
//! replace-all refresh; concurrent readers collapse into a single
//! in-flight network fetch. A failed refresh keeps the previous
//! snapshot and surfaces the error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::error::RegistryError;
use crate::registry::api::RegistryApi;
use crate::registry::types::{ServletRecord, ToolDescriptor};

/// Notified after every successful directory refresh. The plugin cache
/// registers itself here so stale instances are dropped together with
/// the records they were built from.
pub trait RefreshListener: Send + Sync {
    fn on_refresh(&self);
}

#[derive(Default)]
struct Snapshot {
    installs: HashMap<String, Arc<ServletRecord>>,
    /// Derived index, rebuilt on every refresh.
    tool_index: HashMap<String, Arc<ServletRecord>>,
    last_refresh: Option<Instant>,
}

/// Directory of installed servlets with TTL-based refresh.
pub struct Directory {
    api: Arc<RegistryApi>,
    ttl: Option<Duration>,
    state: RwLock<Snapshot>,
    /// Serializes refreshes so concurrent callers await one fetch.
    refresh_lock: Mutex<()>,
    listeners: std::sync::Mutex<Vec<Arc<dyn RefreshListener>>>,
}

impl Directory {
    /// Create a directory backed by the given API client.
    ///
    /// `ttl = None` disables automatic refresh; the directory then only
    /// changes through explicit [`refresh`](Self::refresh) calls.
    pub fn new(api: Arc<RegistryApi>, ttl: Option<Duration>) -> Self {
        Self {
            api,
            ttl,
            state: RwLock::new(Snapshot::default()),
            refresh_lock: Mutex::new(()),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a listener notified after each successful refresh.
    pub fn add_refresh_listener(&self, listener: Arc<dyn RefreshListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// The registry API client this directory reads from.
    pub fn api(&self) -> &Arc<RegistryApi> {
        &self.api
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match snapshot.last_refresh {
            None => true,
            Some(at) => at.elapsed() >= ttl,
        }
    }

    /// Refresh the snapshot if the TTL has elapsed (or it was never
    /// loaded). Returns `true` if a refresh actually happened.
    pub async fn refresh_if_needed(&self) -> Result<bool, RegistryError> {
        if !self.is_stale(&*self.state.read().await) {
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        if !self.is_stale(&*self.state.read().await) {
            return Ok(false);
        }

        self.refresh_locked().await?;
        Ok(true)
    }

    /// Unconditionally refresh the snapshot.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Perform the fetch and swap. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self) -> Result<(), RegistryError> {
        // On failure the old snapshot stays in place: stale-but-available
        // beats unavailable.
        let records = self.api.list_installations().await?;

        let mut installs = HashMap::with_capacity(records.len());
        let mut tool_index = HashMap::new();
        for record in records {
            for tool_name in record.tools.keys() {
                tool_index.insert(tool_name.clone(), Arc::clone(&record));
            }
            installs.insert(record.name.clone(), record);
        }

        {
            let mut state = self.state.write().await;
            state.installs = installs;
            state.tool_index = tool_index;
            state.last_refresh = Some(Instant::now());
        }

        let listeners: Vec<_> = self
            .listeners
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener.on_refresh();
        }

        tracing::debug!("Directory refreshed");
        Ok(())
    }

    /// All tool descriptors in the current snapshot, refreshing first if
    /// the TTL has elapsed.
    pub async fn tools(&self) -> Result<HashMap<String, ToolDescriptor>, RegistryError> {
        self.refresh_if_needed().await?;
        let state = self.state.read().await;
        Ok(state
            .tool_index
            .iter()
            .map(|(name, record)| (name.clone(), record.tools[name].clone()))
            .collect())
    }

    /// All installed servlets in the current snapshot, refreshing first
    /// if the TTL has elapsed.
    pub async fn installs(&self) -> Result<Vec<Arc<ServletRecord>>, RegistryError> {
        self.refresh_if_needed().await?;
        let state = self.state.read().await;
        Ok(state.installs.values().cloned().collect())
    }

    /// Resolve a tool name to its owning servlet in the current
    /// snapshot. Does not refresh.
    pub async fn resolve_tool(&self, name: &str) -> Option<Arc<ServletRecord>> {
        self.state.read().await.tool_index.get(name).cloned()
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").field("ttl", &self.ttl).finish()
    }
}
