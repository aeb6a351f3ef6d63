//! FTP backend.
//!
//! Directory contents come from `LIST` output parsed by [`parser`] and kept in
//! a copy-on-write [`Cache`]. One control connection is dedicated to listings,
//! transfers and mutating commands borrow connections from a pool keyed by
//! working directory.

mod cache;
mod client;
mod file;
mod host;
pub mod parser;
mod transport;
mod url;

pub use cache::{Cache, Directory, Entry};
pub use client::NativeConnector;
pub use file::FtpFile;
pub use host::FtpHost;
pub use transport::{DataReader, DataWriter, FtpConnector, FtpSession, Reply};

use serde::{Deserialize, Serialize};

pub const TAG: &str = "net_ftp";

pub const DEFAULT_PORT: u16 = 21;

/// Connection parameters of an FTP host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub server_url: String,
    pub user: String,
    pub passwd: String,
    pub start_dir: String,
    pub port: u16,
    /// Use PORT instead of PASV for data connections
    pub active: bool,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            user: String::new(),
            passwd: String::new(),
            start_dir: "/".to_owned(),
            port: DEFAULT_PORT,
            active: false,
        }
    }
}

impl FtpConfig {
    pub fn new<S: Into<String>>(server_url: S) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Human readable location, e.g. `ftp://user@server`
    pub fn verbose_junction(&self) -> String {
        if self.user.is_empty() {
            format!("ftp://{}", self.server_url)
        } else {
            format!("ftp://{}@{}", self.user, self.server_url)
        }
    }
}
