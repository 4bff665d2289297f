//! Host functions exposed to sandboxed servlets.
//!
//! Every capability is gated on the servlet's permission manifest, and
//! the manifest is deny-by-default: an absent or empty field grants
//! nothing. A denied request returns an empty result to the guest, it
//! never aborts execution.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SandboxError;
use crate::registry::PermissionManifest;

/// Maximum log entries per execution.
const MAX_LOG_ENTRIES: usize = 1000;

/// Maximum bytes per log message.
const MAX_LOG_MESSAGE_BYTES: usize = 4096;

/// Log levels matching the guest interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn from_wire(level: i32) -> Self {
        match level {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// A single log entry emitted by a servlet.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp_millis: u64,
}

/// Reads volume contents on behalf of the guest. Injected so tests can
/// run without touching the filesystem.
pub trait VolumeReader: Send + Sync {
    fn read(&self, host_path: &str) -> Option<Vec<u8>>;
}

/// Default reader backed by the host filesystem.
pub struct FsVolumeReader;

impl VolumeReader for FsVolumeReader {
    fn read(&self, host_path: &str) -> Option<Vec<u8>> {
        std::fs::read(host_path).ok()
    }
}

/// Per-execution host state: tracks side effects and enforces the
/// permission manifest.
pub struct HostState {
    permissions: PermissionManifest,
    volume_reader: Arc<dyn VolumeReader>,
    logs: Vec<LogEntry>,
    logging_enabled: bool,
    logs_dropped: usize,
}

impl HostState {
    pub fn new(permissions: PermissionManifest) -> Self {
        Self::with_volume_reader(permissions, Arc::new(FsVolumeReader))
    }

    pub fn with_volume_reader(
        permissions: PermissionManifest,
        volume_reader: Arc<dyn VolumeReader>,
    ) -> Self {
        Self {
            permissions,
            volume_reader,
            logs: Vec::new(),
            logging_enabled: true,
            logs_dropped: 0,
        }
    }

    /// Host state with an empty manifest: everything denied.
    pub fn minimal() -> Self {
        Self::new(PermissionManifest::default())
    }

    /// Record a log message from the guest. Rate limited; never fails
    /// execution.
    pub fn log(&mut self, level: LogLevel, message: String) {
        if !self.logging_enabled {
            self.logs_dropped += 1;
            return;
        }

        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logging_enabled = false;
            self.logs_dropped += 1;
            tracing::warn!(
                "Servlet log limit reached ({} entries), further logs dropped",
                MAX_LOG_ENTRIES
            );
            return;
        }

        let message = if message.len() > MAX_LOG_MESSAGE_BYTES {
            let mut truncated = message[..MAX_LOG_MESSAGE_BYTES].to_string();
            truncated.push_str("... (truncated)");
            truncated
        } else {
            message
        };

        self.logs.push(LogEntry {
            level,
            message,
            timestamp_millis: now_millis(),
        });
    }

    /// Look up a static config value from the manifest.
    pub fn config_get(&self, key: &str) -> Option<String> {
        self.permissions.config.get(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Whether the manifest allows network access to `host`.
    ///
    /// Supports exact entries and a leading `*.` wildcard.
    pub fn host_allowed(&self, host: &str) -> bool {
        self.permissions.allowed_hosts.iter().any(|allowed| {
            if allowed == "*" {
                return true;
            }
            if let Some(suffix) = allowed.strip_prefix("*.") {
                return host
                    .strip_suffix(suffix)
                    .is_some_and(|rest| rest.ends_with('.'));
            }
            allowed == host
        })
    }

    /// Read a file through a granted volume.
    ///
    /// The guest path must start with a volume prefix from the manifest;
    /// the remainder is resolved relative to the mapped host path after
    /// traversal validation.
    pub fn volume_read(&self, guest_path: &str) -> Result<Option<Vec<u8>>, SandboxError> {
        validate_guest_path(guest_path)?;

        for (prefix, host_root) in &self.permissions.volumes {
            let prefix = prefix.trim_end_matches('/');
            let Some(rest) = guest_path.strip_prefix(prefix) else {
                continue;
            };
            // Require a path-component boundary after the prefix.
            if !rest.is_empty() && !rest.starts_with('/') {
                continue;
            }
            let rest = rest.trim_start_matches('/');

            let host_path = if rest.is_empty() {
                host_root.clone()
            } else {
                format!("{}/{}", host_root.trim_end_matches('/'), rest)
            };
            return Ok(self.volume_reader.read(&host_path));
        }

        tracing::debug!(path = guest_path, "Volume read denied: no matching volume");
        Ok(None)
    }

    /// Drain collected logs after execution.
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }

    pub fn logs_dropped(&self) -> usize {
        self.logs_dropped
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Check that a manifest can be enforced before an instance is built.
///
/// Volume mappings must pair an absolute guest prefix with a non-empty
/// host path, and the prefix itself must pass the same rules applied to
/// guest read paths.
pub(crate) fn validate_manifest(permissions: &PermissionManifest) -> Result<(), SandboxError> {
    for (guest, host) in &permissions.volumes {
        if !guest.starts_with('/') {
            return Err(SandboxError::ManifestTranslation(format!(
                "volume prefix {:?} is not absolute",
                guest
            )));
        }
        if validate_guest_path(guest).is_err() {
            return Err(SandboxError::ManifestTranslation(format!(
                "volume prefix {:?} is not a valid guest path",
                guest
            )));
        }
        if host.is_empty() {
            return Err(SandboxError::ManifestTranslation(format!(
                "volume prefix {:?} maps to an empty host path",
                guest
            )));
        }
    }
    Ok(())
}

/// Reject guest paths that could escape a volume mapping.
fn validate_guest_path(path: &str) -> Result<(), SandboxError> {
    if path.contains("..") {
        return Err(SandboxError::PathTraversalBlocked(
            "parent directory references not allowed".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(SandboxError::PathTraversalBlocked(
            "null bytes not allowed".to_string(),
        ));
    }

    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(SandboxError::PathTraversalBlocked(
            "Windows-style paths not allowed".to_string(),
        ));
    }

    Ok(())
}
