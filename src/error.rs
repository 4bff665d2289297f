//! Error types for toolgate.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No session credential found (set TOOLGATE_SESSION_ID, TOOLGATE_CONFIG, or create ~/.config/mcpx/config.json)")]
    CredentialNotFound,

    #[error("Failed to parse config file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry/directory errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The installation list could not be fetched. Recoverable: the
    /// previous directory snapshot is kept and the next refresh retries.
    #[error("Directory fetch failed: {reason}")]
    DirectoryFetch { reason: String },

    #[error("Malformed installation payload: {reason}")]
    MalformedPayload { reason: String },

    /// A content-address fetch for module bytes failed. Recoverable.
    #[error("Module fetch failed for {address}: {reason}")]
    ModuleFetch { address: String, reason: String },

    #[error("Registry returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// Sandbox instantiation and runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Engine creation failed: {0}")]
    EngineCreationFailed(String),

    /// Module verification/compilation failure. Generally not recoverable
    /// without a new module version.
    #[error("Module verification failed: {0}")]
    VerificationFailed(String),

    #[error("Instantiation failed: {0}")]
    InstantiationFailed(String),

    /// The permission manifest could not be translated into sandbox
    /// constraints.
    #[error("Manifest translation failed: {0}")]
    ManifestTranslation(String),

    #[error("Execution trapped: {0}")]
    Trapped(String),

    #[error("Execution panicked: {0}")]
    ExecutionPanicked(String),

    #[error("Fuel exhausted: execution exceeded {limit} fuel units")]
    FuelExhausted { limit: u64 },

    #[error("Missing export: {0}")]
    MissingExport(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response JSON: {0}")]
    InvalidResponseJson(String),

    #[error("Path traversal blocked: {0}")]
    PathTraversalBlocked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Tool invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool name is not present in the current directory snapshot.
    /// Caller error, not retried; no sandbox interaction is attempted.
    #[error("Tool {name} not found")]
    NotFound { name: String },

    /// A runtime failure inside the sandboxed call. The plugin cache entry
    /// remains reusable; the chat loop feeds this back to the model as a
    /// tool-role message.
    #[error("Tool {name} invocation failed with input {input}: {reason}")]
    Invocation {
        name: String,
        input: serde_json::Value,
        reason: String,
    },

    #[error("Registry error during tool call: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sandbox error during tool call: {0}")]
    Sandbox(#[from] SandboxError),
}

/// LLM provider errors. Terminate the current turn but not the session.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
