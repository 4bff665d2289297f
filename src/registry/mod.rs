//! Tool registry: installation list, content-addressed modules, and the
//! TTL-cached directory.

pub mod api;
pub mod directory;
pub mod types;

pub use api::RegistryApi;
pub use directory::{Directory, RefreshListener};
pub use types::{PermissionManifest, ServletRecord, ToolDescriptor};
