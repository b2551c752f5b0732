use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// The storage protocols a root can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Protocol {
    Local,
    Smb,
    Ftp,
    Nfs,
    Webdav,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Local => "local",
            Protocol::Smb => "smb",
            Protocol::Ftp => "ftp",
            Protocol::Nfs => "nfs",
            Protocol::Webdav => "webdav",
        }
    }

    /// Whether operations cross a network boundary and deserve the
    /// breaker/retry treatment.
    pub fn is_network(&self) -> bool {
        !matches!(self, Protocol::Local)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Protocol::Local => None,
            Protocol::Smb => Some(445),
            Protocol::Ftp => Some(21),
            Protocol::Nfs => Some(2049),
            Protocol::Webdav => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(Protocol::Local),
            "smb" | "cifs" => Ok(Protocol::Smb),
            "ftp" => Ok(Protocol::Ftp),
            "nfs" => Ok(Protocol::Nfs),
            "webdav" | "dav" => Ok(Protocol::Webdav),
            other => Err(ModelError::UnknownProtocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_protocols_case_insensitively() {
        assert_eq!("SMB".parse::<Protocol>().unwrap(), Protocol::Smb);
        assert_eq!("cifs".parse::<Protocol>().unwrap(), Protocol::Smb);
        assert_eq!("WebDAV".parse::<Protocol>().unwrap(), Protocol::Webdav);
        assert_eq!("local".parse::<Protocol>().unwrap(), Protocol::Local);
    }

    #[test]
    fn rejects_unknown_protocol() {
        let err = "xyz".parse::<Protocol>().unwrap_err();
        assert!(err.to_string().contains("xyz"));
    }
}
