//! Resource limits for sandboxed servlet execution.

use std::time::Duration;

use wasmtime::ResourceLimiter;

/// Default memory limit: 100 MB.
pub const DEFAULT_MEMORY_LIMIT: u64 = 100 * 1024 * 1024;

/// Default fuel limit: 1 billion instructions.
pub const DEFAULT_FUEL_LIMIT: u64 = 1_000_000_000;

/// Default execution timeout: 60 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resource limits applied to a plugin instance.
///
/// Part of the plugin cache key: changing any field yields a distinct
/// instance instead of mutating a live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Maximum linear memory in bytes.
    pub memory_bytes: u64,
    /// Maximum fuel (instruction count) per call.
    pub fuel: u64,
    /// Maximum wall-clock time per call.
    pub timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_LIMIT,
            fuel: DEFAULT_FUEL_LIMIT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SandboxLimits {
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stable key fragment for the plugin cache.
    pub fn cache_key(&self) -> String {
        format!(
            "mem={};fuel={};timeout_ms={}",
            self.memory_bytes,
            self.fuel,
            self.timeout.as_millis()
        )
    }
}

/// Wasmtime [`ResourceLimiter`] enforcing the memory limit on a store.
#[derive(Debug)]
pub struct SandboxLimiter {
    memory_limit: u64,
    memory_used: u64,
}

impl SandboxLimiter {
    pub fn new(memory_limit: u64) -> Self {
        Self {
            memory_limit,
            memory_used: 0,
        }
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }
}

impl ResourceLimiter for SandboxLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired_u64 = desired as u64;

        if desired_u64 > self.memory_limit {
            tracing::warn!(
                current = current,
                desired = desired,
                limit = self.memory_limit,
                "Memory growth denied: would exceed limit"
            );
            return Ok(false);
        }

        self.memory_used = desired_u64;
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= 10_000)
    }
}
