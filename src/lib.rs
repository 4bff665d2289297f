//! Client for a content-addressed WASM tool registry, a sandboxed
//! execution layer for the tools it serves, and a multi-provider
//! tool-calling chat loop on top.
//!
//! The pieces compose explicitly: a [`registry::Directory`] caches the
//! installed servlets, an [`invoke::Invoker`] runs their tools through
//! the Wasmtime sandbox, and a [`chat::ChatSession`] drives an LLM
//! provider against those tools. Nothing is process-global; every
//! handle is constructed and passed.

pub mod chat;
pub mod config;
pub mod error;
pub mod invoke;
pub mod registry;
pub mod sandbox;
pub mod testing;

pub use chat::{ChatEvent, ChatSession, Provider};
pub use config::{ChatConfig, ClientConfig};
pub use error::{Error, Result};
pub use invoke::{Invoker, ToolDispatch, ToolResponse};
pub use registry::{Directory, ToolDescriptor};
pub use sandbox::{SandboxConfig, SandboxLimits};
