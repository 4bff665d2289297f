//! Sandboxed servlet execution on Wasmtime.

pub mod host;
pub mod limits;
pub mod plugin;
pub mod runtime;

pub use host::{HostState, LogLevel};
pub use limits::SandboxLimits;
pub use plugin::{PluginCache, PluginInstance, PluginKey};
pub use runtime::{SandboxConfig, SandboxRuntime};
