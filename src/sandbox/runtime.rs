//! Wasmtime engine setup for the plugin sandbox.
//!
//! One engine is shared by every plugin instance; per-call state lives
//! in fresh stores. Compilation happens once per module on a blocking
//! task.

use wasmtime::{Config, Engine, OptLevel};

use crate::error::SandboxError;
use crate::sandbox::limits::SandboxLimits;

/// Configuration for the sandbox runtime.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Default resource limits for plugin instances.
    pub default_limits: SandboxLimits,
    /// Cranelift optimization level.
    pub optimization_level: OptLevel,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_limits: SandboxLimits::default(),
            optimization_level: OptLevel::Speed,
        }
    }
}

impl SandboxConfig {
    /// Minimal config for tests: tight limits, fast compilation.
    pub fn for_testing() -> Self {
        Self {
            default_limits: SandboxLimits::default()
                .with_memory(1024 * 1024)
                .with_fuel(100_000)
                .with_timeout(std::time::Duration::from_secs(5)),
            optimization_level: OptLevel::None,
        }
    }
}

/// Sandbox runtime holding the shared Wasmtime engine.
pub struct SandboxRuntime {
    engine: Engine,
    config: SandboxConfig,
}

impl SandboxRuntime {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let mut wasmtime_config = Config::new();

        // Fuel metering for CPU limiting.
        wasmtime_config.consume_fuel(true);

        // Epoch interruption as a backup timeout mechanism.
        wasmtime_config.epoch_interruption(true);

        // Component model (WASI Preview 2) servlets.
        wasmtime_config.wasm_component_model(true);

        // No threads inside the sandbox.
        wasmtime_config.wasm_threads(false);

        wasmtime_config.cranelift_opt_level(config.optimization_level);
        wasmtime_config.debug_info(false);

        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| SandboxError::EngineCreationFailed(e.to_string()))?;

        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl std::fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = SandboxRuntime::new(SandboxConfig::for_testing()).unwrap();
        assert_eq!(runtime.config().default_limits.fuel, 100_000);
    }

    #[test]
    fn test_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_limits, SandboxLimits::default());
    }
}
