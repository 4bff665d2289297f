//! HTTP client for the tool registry.
//!
//! Two endpoints: the installation list and content-addressed module
//! bytes. Both authenticate with the session credential sent as a
//! `sessionId` cookie.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::config::ClientConfig;
use crate::error::RegistryError;
use crate::registry::types::{InstallationsPayload, ServletRecord};

/// Registry HTTP API client.
pub struct RegistryApi {
    client: reqwest::Client,
    base_url: String,
    session: SecretString,
}

impl RegistryApi {
    /// Create a new API client.
    pub fn new(config: &ClientConfig, session: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    fn installations_url(&self) -> String {
        format!("{}/api/profiles/~/default/installations", self.base_url)
    }

    fn content_url(&self, address: &str) -> String {
        format!("{}/api/c/{}", self.base_url, address)
    }

    fn session_cookie(&self) -> String {
        format!("sessionId={}", self.session.expose_secret())
    }

    /// Fetch the full install list. One network call per invocation;
    /// caching is the directory's concern.
    pub async fn list_installations(&self) -> Result<Vec<Arc<ServletRecord>>, RegistryError> {
        let url = self.installations_url();
        tracing::debug!(url = %url, "Fetching installation list");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, self.session_cookie())
            .send()
            .await
            .map_err(|e| RegistryError::DirectoryFetch {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(RegistryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: InstallationsPayload =
            serde_json::from_str(&body).map_err(|e| RegistryError::MalformedPayload {
                reason: format!("JSON parse error: {}", e),
            })?;

        let mut records = Vec::with_capacity(payload.installs.len());
        for install in payload.installs {
            records.push(Arc::new(install.into_record()?));
        }

        tracing::info!(count = records.len(), "Fetched installed servlets");
        Ok(records)
    }

    /// Fetch raw module bytes for a content address.
    pub async fn fetch_content(&self, address: &str) -> Result<Vec<u8>, RegistryError> {
        let url = self.content_url(address);
        tracing::debug!(url = %url, "Fetching module bytes");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, self.session_cookie())
            .send()
            .await
            .map_err(|e| RegistryError::ModuleFetch {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::ModuleFetch {
                address: address.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::ModuleFetch {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(address = address, len = bytes.len(), "Fetched module bytes");
        Ok(bytes.to_vec())
    }
}

impl std::fmt::Debug for RegistryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> RegistryApi {
        RegistryApi::new(
            &ClientConfig::default().with_base_url(base),
            SecretString::from("test-session".to_string()),
        )
    }

    #[test]
    fn test_urls() {
        let api = api("https://registry.example");
        assert_eq!(
            api.installations_url(),
            "https://registry.example/api/profiles/~/default/installations"
        );
        assert_eq!(
            api.content_url("sha256:abc"),
            "https://registry.example/api/c/sha256:abc"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = api("https://registry.example/");
        assert_eq!(
            api.content_url("x"),
            "https://registry.example/api/c/x"
        );
    }

    #[test]
    fn test_session_cookie() {
        let api = api("https://registry.example");
        assert_eq!(api.session_cookie(), "sessionId=test-session");
    }
}
