//! Plugin instances and the keyed plugin cache.
//!
//! One live instance exists per (servlet, sandbox options) key. The
//! compiled component is reused across calls; each call runs in a fresh
//! store so a trap or fuel exhaustion never poisons the instance. Calls
//! on one instance are serialized through a mutex.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use wasmtime::component::{Component, Linker, Val};
use wasmtime::Store;

use crate::error::SandboxError;
use crate::registry::{RefreshListener, ServletRecord};
use crate::sandbox::host::{HostState, LogLevel};
use crate::sandbox::limits::{SandboxLimiter, SandboxLimits};
use crate::sandbox::runtime::SandboxRuntime;

/// Cache key: servlet identity plus the sandbox options it was built
/// with. Different options mean a different instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginKey {
    pub servlet: String,
    pub options: String,
}

impl PluginKey {
    pub fn new(servlet: &ServletRecord, limits: &SandboxLimits) -> Self {
        Self {
            servlet: servlet.name.clone(),
            options: limits.cache_key(),
        }
    }
}

/// Per-call store data: the memory limiter plus host-function state.
struct StoreData {
    limiter: SandboxLimiter,
    host: HostState,
}

/// A verified, compiled servlet ready to take calls.
pub struct PluginInstance {
    runtime: Arc<SandboxRuntime>,
    servlet: Arc<ServletRecord>,
    component: Component,
    limits: SandboxLimits,
    /// Calls on one instance run one at a time.
    call_lock: Mutex<()>,
}

impl PluginInstance {
    /// Verify and compile the servlet's module into a live instance.
    ///
    /// The permission manifest is checked first: a mapping the sandbox
    /// cannot enforce yields [`SandboxError::ManifestTranslation`].
    /// Compilation runs on a blocking task; a module that fails
    /// verification yields [`SandboxError::VerificationFailed`] and no
    /// instance.
    pub async fn instantiate(
        runtime: Arc<SandboxRuntime>,
        servlet: Arc<ServletRecord>,
        module_bytes: Vec<u8>,
        limits: SandboxLimits,
    ) -> Result<Arc<Self>, SandboxError> {
        crate::sandbox::host::validate_manifest(&servlet.permissions)?;

        let engine = runtime.engine().clone();
        let component = tokio::task::spawn_blocking(move || {
            Component::new(&engine, &module_bytes)
                .map_err(|e| SandboxError::VerificationFailed(e.to_string()))
        })
        .await
        .map_err(|e| SandboxError::ExecutionPanicked(e.to_string()))??;

        tracing::info!(servlet = %servlet.name, "Compiled servlet module");

        Ok(Arc::new(Self {
            runtime,
            servlet,
            component,
            limits,
            call_lock: Mutex::new(()),
        }))
    }

    pub fn servlet(&self) -> &Arc<ServletRecord> {
        &self.servlet
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Invoke a tool on this instance.
    ///
    /// The guest receives `{"params": {"name": <tool>, "arguments": <input>}}`
    /// on its `call` export and returns the raw response JSON, which the
    /// caller decodes.
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<String, SandboxError> {
        let payload = serde_json::json!({
            "params": {
                "name": tool_name,
                "arguments": arguments,
            }
        })
        .to_string();

        let _serial = self.call_lock.lock().await;

        let engine = self.runtime.engine().clone();
        let component = self.component.clone();
        let permissions = self.servlet.permissions.clone();
        let limits = self.limits.clone();
        let timeout = limits.timeout;
        let tool = tool_name.to_string();

        let result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                call_sync(&engine, &component, permissions, &limits, &payload)
            }),
        )
        .await;

        let (output, logs) = match result {
            Ok(joined) => joined
                .map_err(|e| SandboxError::ExecutionPanicked(e.to_string()))?
                .map_err(|e| {
                    tracing::warn!(servlet = %self.servlet.name, tool = %tool, error = %e, "Servlet call failed");
                    e
                })?,
            Err(_) => return Err(SandboxError::Timeout(timeout)),
        };

        for log in logs {
            match log.level {
                LogLevel::Trace => tracing::trace!(target: "servlet", "{}", log.message),
                LogLevel::Debug => tracing::debug!(target: "servlet", "{}", log.message),
                LogLevel::Info => tracing::info!(target: "servlet", "{}", log.message),
                LogLevel::Warn => tracing::warn!(target: "servlet", "{}", log.message),
                LogLevel::Error => tracing::error!(target: "servlet", "{}", log.message),
            }
        }

        Ok(output)
    }
}

/// Run one guest call in a fresh store.
fn call_sync(
    engine: &wasmtime::Engine,
    component: &Component,
    permissions: crate::registry::PermissionManifest,
    limits: &SandboxLimits,
    payload: &str,
) -> Result<(String, Vec<crate::sandbox::host::LogEntry>), SandboxError> {
    let store_data = StoreData {
        limiter: SandboxLimiter::new(limits.memory_bytes),
        host: HostState::new(permissions),
    };
    let mut store = Store::new(engine, store_data);

    store
        .set_fuel(limits.fuel)
        .map_err(|e| SandboxError::ConfigError(format!("Failed to set fuel: {}", e)))?;
    store.epoch_deadline_trap();
    store.set_epoch_deadline(1);
    store.limiter(|data| &mut data.limiter);

    let mut linker = Linker::new(engine);
    add_host_functions(&mut linker)?;

    let instance = linker
        .instantiate(&mut store, component)
        .map_err(|e| SandboxError::InstantiationFailed(e.to_string()))?;

    let call_func = instance
        .get_func(&mut store, "call")
        .ok_or_else(|| SandboxError::MissingExport("call".to_string()))?;

    let mut results = vec![Val::Bool(false)];
    call_func
        .call(&mut store, &[Val::String(payload.to_string())], &mut results)
        .map_err(|e| {
            let error_str = e.to_string();
            if error_str.contains("out of fuel") {
                SandboxError::FuelExhausted { limit: limits.fuel }
            } else {
                SandboxError::Trapped(error_str)
            }
        })?;

    call_func
        .post_return(&mut store)
        .map_err(|e| SandboxError::Trapped(format!("post_return failed: {}", e)))?;

    let output = match &results[0] {
        Val::String(s) => s.to_string(),
        other => {
            return Err(SandboxError::InvalidResponseJson(format!(
                "expected string result, got {:?}",
                other
            )))
        }
    };

    let logs = store.data_mut().host.take_logs();
    Ok((output, logs))
}

/// Wire the manifest-gated host functions into the linker.
fn add_host_functions(linker: &mut Linker<StoreData>) -> Result<(), SandboxError> {
    let wire_err =
        |name: &str, e: anyhow::Error| SandboxError::ConfigError(format!("Failed to add {} function: {}", name, e));

    // log(level: s32, message: string)
    linker
        .root()
        .func_wrap(
            "log",
            |mut ctx: wasmtime::StoreContextMut<'_, StoreData>, (level, message): (i32, String)| {
                ctx.data_mut().host.log(LogLevel::from_wire(level), message);
                Ok(())
            },
        )
        .map_err(|e| wire_err("log", e))?;

    // config-get(key: string) -> option<string>
    linker
        .root()
        .func_wrap(
            "config-get",
            |ctx: wasmtime::StoreContextMut<'_, StoreData>,
             (key,): (String,)|
             -> anyhow::Result<(Option<String>,)> {
                Ok((ctx.data().host.config_get(&key),))
            },
        )
        .map_err(|e| wire_err("config-get", e))?;

    // host-allowed(host: string) -> bool
    linker
        .root()
        .func_wrap(
            "host-allowed",
            |ctx: wasmtime::StoreContextMut<'_, StoreData>,
             (host,): (String,)|
             -> anyhow::Result<(bool,)> {
                Ok((ctx.data().host.host_allowed(&host),))
            },
        )
        .map_err(|e| wire_err("host-allowed", e))?;

    // volume-read(path: string) -> option<list<u8>>
    linker
        .root()
        .func_wrap(
            "volume-read",
            |ctx: wasmtime::StoreContextMut<'_, StoreData>,
             (path,): (String,)|
             -> anyhow::Result<(Option<Vec<u8>>,)> {
                // Traversal attempts read as denied, not as traps.
                Ok((ctx.data().host.volume_read(&path).ok().flatten(),))
            },
        )
        .map_err(|e| wire_err("volume-read", e))?;

    Ok(())
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("servlet", &self.servlet.name)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Keyed cache of live plugin instances.
///
/// Concurrent requests for the same key collapse into one
/// instantiation. Clearing the cache drops references; in-flight calls
/// keep their instance alive through their own `Arc`.
#[derive(Default)]
pub struct PluginCache {
    slots: std::sync::Mutex<HashMap<PluginKey, Arc<OnceCell<Arc<PluginInstance>>>>>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the instance for `key`, creating it through `create` if
    /// absent. A cache hit never runs `create`, so expensive work such
    /// as the module-bytes fetch belongs inside it. A failed creation
    /// leaves the slot empty so the next caller retries.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        key: PluginKey,
        create: F,
    ) -> Result<Arc<PluginInstance>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<PluginInstance>, E>>,
        E: From<SandboxError>,
    {
        let cell = {
            let mut slots = self.slots.lock().map_err(|_| {
                E::from(SandboxError::ConfigError("plugin cache poisoned".to_string()))
            })?;
            Arc::clone(slots.entry(key).or_default())
        };

        let instance = cell.get_or_try_init(create).await?;
        Ok(Arc::clone(instance))
    }

    /// Drop every cached instance.
    pub fn clear(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            let count = slots.len();
            slots.clear();
            if count > 0 {
                tracing::debug!(count = count, "Cleared plugin cache");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RefreshListener for PluginCache {
    fn on_refresh(&self) {
        self.clear();
    }
}

impl std::fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCache").field("len", &self.len()).finish()
    }
}
