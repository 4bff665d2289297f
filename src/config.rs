//! Configuration for toolgate.
//!
//! Everything is threaded through explicit config structs; there is no
//! module-level default client or ambient singleton. The session credential
//! is discovered with priority: env var > config-file env var > the mcpx
//! config file in the platform config directory.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default registry base URL.
pub const DEFAULT_BASE_URL: &str = "https://www.mcp.run";

/// Default time between directory refreshes.
pub const DEFAULT_TOOL_REFRESH: Duration = Duration::from_secs(60);

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registry base URL.
    pub base_url: String,
    /// How long a directory snapshot stays fresh. `None` disables
    /// automatic refresh entirely.
    pub tool_refresh: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tool_refresh: Some(DEFAULT_TOOL_REFRESH),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_tool_refresh(mut self, refresh: Option<Duration>) -> Self {
        self.tool_refresh = refresh;
        self
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model name passed to the provider.
    pub model: String,
    /// Provider endpoint override. Each adapter has its own default.
    pub base_url: Option<String>,
    /// System prompt prepended to every conversation.
    pub system: String,
    /// Maximum tokens per model turn (used by providers that require it).
    pub max_tokens: u32,
}

impl ChatConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: None,
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 1024,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }
}

/// Default system prompt for tool-calling chats.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
- when evaluating a javascript function code don't print the result to stdout
  instead just call the generated javascript function on its own since the code
  will be executed using eval
- Do not come up with directions or indications.
- Always use the provided functions when applicable, and share the results of
  tool calls with the user
- Invoke the tools upon requests you cannot fulfill on your own
  and parse the responses
- Do not invoke the same tool multiple times in a row with the same
  arguments
- Always try to provide a well formatted, itemized summary";

/// Resolve the registry session credential.
///
/// Priority:
/// 1. `TOOLGATE_SESSION_ID` env var (the credential itself)
/// 2. `TOOLGATE_CONFIG` env var (path to an mcpx-style config.json)
/// 3. `<config dir>/mcpx/config.json`
pub fn resolve_session_credential() -> Result<SecretString, ConfigError> {
    if let Ok(id) = std::env::var("TOOLGATE_SESSION_ID") {
        if !id.is_empty() {
            return Ok(SecretString::from(id));
        }
    }

    if let Ok(path) = std::env::var("TOOLGATE_CONFIG") {
        return parse_session_config(Path::new(&path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("mcpx").join("config.json");
        if path.exists() {
            return parse_session_config(&path);
        }
    }

    Err(ConfigError::CredentialNotFound)
}

/// Parse the session credential out of an mcpx-style config file.
///
/// The file holds `{"authentication": [[<name>, "sessionId=<value>"], ...]}`;
/// the credential is everything after the first `=` of the first entry.
fn parse_session_config(path: &Path) -> Result<SecretString, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let parse_err = |reason: &str| ConfigError::ParseError {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| parse_err(&e.to_string()))?;

    let auth = json
        .get("authentication")
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .and_then(|pair| pair.as_array())
        .and_then(|pair| pair.get(1))
        .and_then(|v| v.as_str())
        .ok_or_else(|| parse_err("missing authentication entry"))?;

    let credential = auth
        .split_once('=')
        .map(|(_, value)| value)
        .ok_or_else(|| parse_err("authentication entry has no '=' separator"))?;

    Ok(SecretString::from(credential.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.tool_refresh, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_session_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"{"authentication": [["mcp.run", "sessionId=abc-123"]]}"#)
            .unwrap();

        let cred = parse_session_config(&path).unwrap();
        assert_eq!(cred.expose_secret(), "abc-123");
    }

    #[test]
    fn test_parse_session_config_value_contains_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            br#"{"authentication": [["mcp.run", "sessionId=a=b=c"]]}"#,
        )
        .unwrap();

        let cred = parse_session_config(&path).unwrap();
        // Only the first '=' separates key from value
        assert_eq!(cred.expose_secret(), "a=b=c");
    }

    #[test]
    fn test_parse_session_config_missing_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{}").unwrap();

        let err = parse_session_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_parse_session_config_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = parse_session_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
