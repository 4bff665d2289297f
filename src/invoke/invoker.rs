//! Tool invocation: directory lookup, lazy module fetch, plugin cache,
//! sandboxed call, response decoding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::ClientConfig;
use crate::error::{Error, ToolError};
use crate::invoke::content::ToolResponse;
use crate::registry::{Directory, RegistryApi, ToolDescriptor};
use crate::sandbox::plugin::PluginKey;
use crate::sandbox::{PluginCache, PluginInstance, SandboxConfig, SandboxRuntime};

/// The seam between tool execution and its consumers (chat loop, CLI,
/// tests).
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Tools currently available for calling.
    async fn list_tools(&self) -> Result<HashMap<String, ToolDescriptor>, ToolError>;

    /// Invoke a tool by name with JSON arguments.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolError>;
}

/// Executes tools out of the registry directory through the sandbox.
pub struct Invoker {
    directory: Arc<Directory>,
    runtime: Arc<SandboxRuntime>,
    plugins: Arc<PluginCache>,
}

impl Invoker {
    /// Build an invoker from explicit parts. The plugin cache is wired
    /// to the directory so a refresh drops stale instances.
    pub fn new(
        config: &ClientConfig,
        session: SecretString,
        sandbox: SandboxConfig,
    ) -> Result<Self, Error> {
        let api = Arc::new(RegistryApi::new(config, session));
        let directory = Arc::new(Directory::new(api, config.tool_refresh));
        let runtime = Arc::new(SandboxRuntime::new(sandbox)?);
        let plugins = Arc::new(PluginCache::new());
        directory.add_refresh_listener(plugins.clone());

        Ok(Self {
            directory,
            runtime,
            plugins,
        })
    }

    /// Build an invoker with the session credential discovered from the
    /// environment.
    pub fn connect(config: &ClientConfig) -> Result<Self, Error> {
        let session = crate::config::resolve_session_credential()?;
        Self::new(config, session, SandboxConfig::default())
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Number of live plugin instances.
    pub fn cached_plugins(&self) -> usize {
        self.plugins.len()
    }

    async fn instance_for(&self, name: &str) -> Result<Arc<PluginInstance>, ToolError> {
        self.directory.refresh_if_needed().await?;

        let servlet = self
            .directory
            .resolve_tool(name)
            .await
            .ok_or_else(|| ToolError::NotFound {
                name: name.to_string(),
            })?;

        let limits = self.runtime.config().default_limits.clone();
        let key = PluginKey::new(&servlet, &limits);
        let runtime = Arc::clone(&self.runtime);
        let api = Arc::clone(self.directory.api());
        let record = Arc::clone(&servlet);
        let instance = self
            .plugins
            .get_or_create(key, || async move {
                // Module bytes are only needed to build the instance; a
                // cache hit skips both the record lookup and the copy.
                let address = record.content_address.clone();
                let bytes = record
                    .module_bytes(|| async move { api.fetch_content(&address).await })
                    .await?
                    .to_vec();
                PluginInstance::instantiate(runtime, record, bytes, limits)
                    .await
                    .map_err(ToolError::from)
            })
            .await?;

        Ok(instance)
    }
}

#[async_trait]
impl ToolDispatch for Invoker {
    async fn list_tools(&self) -> Result<HashMap<String, ToolDescriptor>, ToolError> {
        Ok(self.directory.tools().await?)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolError> {
        tracing::info!(tool = name, "Calling tool");
        let instance = self.instance_for(name).await?;

        // Runtime failures inside the call carry the tool name and input
        // that caused them. The cached instance stays reusable.
        let invocation_err = |reason: String| ToolError::Invocation {
            name: name.to_string(),
            input: arguments.clone(),
            reason,
        };

        let raw = instance
            .call(name, &arguments)
            .await
            .map_err(|e| invocation_err(e.to_string()))?;
        let response = ToolResponse::decode(&raw).map_err(|e| invocation_err(e.to_string()))?;

        tracing::debug!(tool = name, blocks = response.content.len(), "Tool call finished");
        Ok(response)
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("directory", &self.directory)
            .field("plugins", &self.plugins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker_for(base_url: &str, refresh: Option<std::time::Duration>) -> Invoker {
        let config = ClientConfig::default()
            .with_base_url(base_url)
            .with_tool_refresh(refresh);
        Invoker::new(
            &config,
            SecretString::from("s".to_string()),
            SandboxConfig::for_testing(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_call_unknown_tool_is_not_found() {
        // With no TTL and no explicit refresh the directory is empty, so
        // resolution fails before any network or sandbox work.
        let invoker = invoker_for("http://127.0.0.1:9", None);
        let err = invoker
            .call_tool("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { name } if name == "missing"));
        assert_eq!(invoker.cached_plugins(), 0);
    }

    #[tokio::test]
    async fn test_directory_fetch_failure_surfaces_as_registry_error() {
        // TTL set and nothing listening on the port: the initial refresh
        // fails and the error propagates.
        let invoker = invoker_for(
            "http://127.0.0.1:9",
            Some(std::time::Duration::from_secs(60)),
        );
        let err = invoker
            .call_tool("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Registry(_)));
    }
}
