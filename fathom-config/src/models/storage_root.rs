use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A credential value that is zeroized on drop and never printed.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"<redacted>").finish()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

/// Declarative definition of one storage root.
///
/// `protocol` stays a plain string here; the client factory parses and
/// validates it so an unknown value is rejected before any client exists.
/// Which of the optional fields are required depends on the protocol and is
/// likewise enforced by the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRootConfig {
    /// Stable identity. When absent, one is generated at registration;
    /// supply it explicitly when checkpoints or cached snapshots must
    /// survive restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Base directory for local roots, share name for SMB, export for NFS,
    /// initial directory for FTP, path prefix for WebDAV.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Where mount-backed protocols (NFS, SMB) attach the remote tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    /// Endpoint URL for WebDAV roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra comma-separated protocol/mount options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default = "StorageRootConfig::default_enabled")]
    pub enabled: bool,
    /// Scan depth limit, root = 0. `None` or `0` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub enable_duplicate_detection: bool,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl StorageRootConfig {
    fn default_enabled() -> bool {
        true
    }

    /// Minimal shape for a named root; protocol-specific fields start empty.
    pub fn named(name: impl Into<String>, protocol: impl Into<String>) -> Self {
        StorageRootConfig {
            id: None,
            name: name.into(),
            protocol: protocol.into(),
            host: None,
            port: None,
            path: String::new(),
            username: None,
            password: None,
            domain: None,
            mount_point: None,
            url: None,
            options: None,
            enabled: true,
            max_depth: None,
            enable_duplicate_detection: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Depth limit normalized so `0` means unlimited.
    pub fn depth_limit(&self) -> Option<u32> {
        match self.max_depth {
            None | Some(0) => None,
            other => other,
        }
    }
}
