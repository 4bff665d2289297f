//! Servlet and tool types, plus the registry wire format.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::RegistryError;

/// A single named, schema-described callable exposed by a servlet.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Tool name, unique within a directory snapshot.
    pub name: String,
    /// Information about the tool and how to use it.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: serde_json::Value,
}

/// The declarative allow-list governing a sandbox instance.
///
/// Supplied verbatim by the registry. Fields absent from the payload
/// default to empty, and empty means deny.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionManifest {
    /// Filesystem volumes: guest path prefix -> host path.
    pub volumes: HashMap<String, String>,
    /// Network hosts the servlet may reach.
    pub allowed_hosts: Vec<String>,
    /// Static configuration values exposed to the servlet.
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// An installed servlet: one registered unit bundling one or more tools
/// and a content-addressed WASM module.
#[derive(Debug)]
pub struct ServletRecord {
    /// Install name, unique within a directory snapshot.
    pub name: String,
    /// Servlet slug.
    pub slug: String,
    /// Servlet binding ID.
    pub binding_id: String,
    /// Content address of the WASM module.
    pub content_address: String,
    /// Permission manifest for the sandbox.
    pub permissions: PermissionManifest,
    /// Tools provided by this servlet, keyed by tool name.
    pub tools: HashMap<String, ToolDescriptor>,
    /// Module bytes, fetched lazily exactly once on first instantiation.
    module_bytes: OnceCell<Vec<u8>>,
}

impl ServletRecord {
    /// Get the module bytes, fetching them through `fetch` on first use.
    ///
    /// Concurrent callers collapse into a single fetch; the result is
    /// stored on the record for the rest of its lifetime. A failed fetch
    /// leaves the cell empty so the next caller retries.
    pub async fn module_bytes<F, Fut>(&self, fetch: F) -> Result<&[u8], RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, RegistryError>>,
    {
        let bytes = self.module_bytes.get_or_try_init(fetch).await?;
        Ok(bytes.as_slice())
    }

    /// Whether module bytes have already been fetched.
    pub fn has_module_bytes(&self) -> bool {
        self.module_bytes.initialized()
    }
}

// Wire format of `GET <base>/api/profiles/~/default/installations`.

#[derive(Debug, Deserialize)]
pub(crate) struct InstallationsPayload {
    pub installs: Vec<InstallPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstallPayload {
    pub name: String,
    pub binding: BindingPayload,
    pub servlet: ServletPayload,
    #[serde(default)]
    pub settings: SettingsPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BindingPayload {
    pub id: String,
    #[serde(rename = "contentAddress")]
    pub content_address: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServletPayload {
    pub slug: String,
    pub meta: MetaPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetaPayload {
    pub schema: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SettingsPayload {
    #[serde(default)]
    pub permissions: PermissionsPayload,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PermissionsPayload {
    #[serde(default)]
    pub filesystem: FilesystemPayload,
    #[serde(default)]
    pub network: NetworkPayload,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FilesystemPayload {
    #[serde(default)]
    pub volumes: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NetworkPayload {
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ToolSchemaPayload {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: serde_json::Value,
}

impl InstallPayload {
    /// Build a [`ServletRecord`] from one install entry.
    ///
    /// The servlet schema either carries a `tools` array or is itself a
    /// single tool object.
    pub(crate) fn into_record(self) -> Result<ServletRecord, RegistryError> {
        let schema = self.servlet.meta.schema;
        let tool_values: Vec<serde_json::Value> = match schema.get("tools") {
            Some(tools) => tools
                .as_array()
                .cloned()
                .ok_or_else(|| RegistryError::MalformedPayload {
                    reason: format!("install {}: schema tools is not an array", self.name),
                })?,
            None => vec![schema],
        };

        let mut tools = HashMap::new();
        for value in tool_values {
            let parsed: ToolSchemaPayload =
                serde_json::from_value(value).map_err(|e| RegistryError::MalformedPayload {
                    reason: format!("install {}: bad tool schema: {}", self.name, e),
                })?;
            tools.insert(
                parsed.name.clone(),
                ToolDescriptor {
                    name: parsed.name,
                    description: parsed.description,
                    input_schema: parsed.input_schema,
                },
            );
        }

        Ok(ServletRecord {
            name: self.name,
            slug: self.servlet.slug,
            binding_id: self.binding.id,
            content_address: self.binding.content_address,
            permissions: PermissionManifest {
                volumes: self.settings.permissions.filesystem.volumes,
                allowed_hosts: self.settings.permissions.network.domains,
                config: self.settings.config,
            },
            tools,
            module_bytes: OnceCell::new(),
        })
    }
}
