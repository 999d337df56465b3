//! Server settings.
//!
//! Settings are read once from a JSON file and passed to the server as an
//! immutable value. Every field has a default, so a partial file (or no
//! file at all) is valid.

use crate::address::{parse_address, ServerAddress, DEFAULT_PORT};
use crate::codec::MAX_PASSWORD_BYTES;
use crate::error::{Result, ServerError};
use crate::protocol::{PermissionLevel, PROTOCOL_VERSION};
use rosetta_tree::{Severity, ValidationPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// What to do with a removal that would strand mapped descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Refuse unless the request asks for a cascade.
    #[default]
    Reject,
    /// Always remove the whole subtree.
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind, `host:port` or `[v6]:port`.
    pub bind: String,
    /// Shared login password. Empty means no password.
    pub password: String,
    pub protocol_version: u32,
    /// Checksum of the analysed input; logins must match when set.
    pub checksum: Option<String>,
    pub default_permission: PermissionLevel,
    /// Per-identity permission overrides.
    pub permissions: BTreeMap<String, PermissionLevel>,
    /// Identities refused at login.
    pub banned: BTreeSet<String>,
    pub partition_severity: Severity,
    pub removal_policy: RemovalPolicy,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Messages a session may have queued before it is dropped.
    pub outbound_watermark: usize,
    pub max_frame_bytes: usize,
    /// Changes kept for `Resync`. 0 keeps all of them.
    pub change_log_retention: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", DEFAULT_PORT),
            password: String::new(),
            protocol_version: PROTOCOL_VERSION,
            checksum: None,
            default_permission: PermissionLevel::Editor,
            permissions: BTreeMap::new(),
            banned: BTreeSet::new(),
            partition_severity: Severity::Hard,
            removal_policy: RemovalPolicy::Reject,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 30_000,
            outbound_watermark: 1024,
            max_frame_bytes: 1 << 20,
            change_log_retention: 10_000,
        }
    }
}

impl ServerSettings {
    /// Reads and validates settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: ServerSettings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.password.len() > MAX_PASSWORD_BYTES {
            return Err(ServerError::Settings(format!(
                "password exceeds {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }
        if self.bind_address().is_none() {
            return Err(ServerError::InvalidAddress(self.bind.clone()));
        }
        if self.outbound_watermark == 0 {
            return Err(ServerError::Settings(
                "outbound_watermark must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms < self.heartbeat_interval_ms
        {
            return Err(ServerError::Settings(
                "heartbeat_interval_ms must be non-zero and at most heartbeat_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Option<ServerAddress> {
        parse_address(&self.bind, DEFAULT_PORT)
    }

    pub fn permission_for(&self, identity: &str) -> PermissionLevel {
        self.permissions
            .get(identity)
            .copied()
            .unwrap_or(self.default_permission)
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            partition_severity: self.partition_severity,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{"bind": "[::1]:9000", "partition_severity": "advisory",
                "permissions": {"root": "admin"}}"#,
        )
        .unwrap();

        let settings = ServerSettings::load(&path).unwrap();
        assert_eq!(settings.bind_address(), Some(ServerAddress::new("::1", 9000)));
        assert_eq!(settings.partition_severity, Severity::Advisory);
        assert_eq!(settings.removal_policy, RemovalPolicy::Reject);
        assert_eq!(settings.permission_for("root"), PermissionLevel::Admin);
        assert_eq!(settings.permission_for("guest"), PermissionLevel::Editor);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("server.json");

        let settings = ServerSettings {
            removal_policy: RemovalPolicy::Cascade,
            ..ServerSettings::default()
        };
        settings.save(&path).unwrap();

        assert_eq!(ServerSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_rejects_bad_values() {
        let settings = ServerSettings {
            password: "p".repeat(MAX_PASSWORD_BYTES + 1),
            ..ServerSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ServerError::Settings(_))));

        let settings = ServerSettings {
            bind: "127.0.0.1:lmao".into(),
            ..ServerSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ServerError::InvalidAddress(_))
        ));

        let settings = ServerSettings {
            heartbeat_timeout_ms: 10,
            heartbeat_interval_ms: 100,
            ..ServerSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
