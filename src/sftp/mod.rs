//! SFTP backend.
//!
//! Every operation borrows an authenticated session from a
//! [`ConnectionPool`] and gives it back when done. Nothing is cached, each
//! call asks the server.

pub mod accounts;
mod attrs;
mod file;
mod host;
mod native;
mod os;
mod pool;
mod status;
mod transport;

pub use attrs::{AttrFlags, Attributes};
pub use file::SftpFile;
pub use host::SftpHost;
pub use native::NativeConnector;
pub use os::OsType;
pub use pool::{ConnectionPool, PooledConnection};
pub use status::StatusCode;
pub use transport::{RemoteFile, SshConnector, SshSession, VolumeStats};

use serde::{Deserialize, Serialize};

pub const TAG: &str = "net_sftp";

pub const DEFAULT_PORT: u16 = 22;

/// Connection parameters of an SFTP host.
///
/// With a `keypath` the `passwd` is the passphrase of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpConfig {
    pub server_url: String,
    pub user: String,
    pub passwd: String,
    pub keypath: String,
    pub port: u16,
    /// Initial directory, discovered on connect when empty
    pub home: String,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            user: String::new(),
            passwd: String::new(),
            keypath: String::new(),
            port: DEFAULT_PORT,
            home: String::new(),
        }
    }
}

impl SftpConfig {
    pub fn new<S: Into<String>>(server_url: S) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Human readable location, e.g. `sftp://user@server`
    pub fn verbose_junction(&self) -> String {
        format!("sftp://{}@{}", self.user, self.server_url)
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    #[test]
    fn test_identity() {
        let a = SftpConfig {
            user: "root".into(),
            keypath: "/home/me/.ssh/id_ed25519".into(),
            ..SftpConfig::new("10.0.0.2")
        };
        assert_eq!(a.verbose_junction(), "sftp://root@10.0.0.2");
        assert_eq!(a, a.clone());
        assert_ne!(a, SftpConfig { home: "/srv".into(), ..a.clone() });
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: SftpConfig = serde_json::from_str(r#"{"server_url": "box", "user": "me"}"#).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.home.is_empty());
        assert!(config.keypath.is_empty());
    }
}
