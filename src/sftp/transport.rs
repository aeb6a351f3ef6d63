use super::{attrs::Attributes, SftpConfig};
use crate::{error::Result, host::OpenFlags};

/// Volume statistics of the `statvfs@openssh.com` extension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u64,
    pub fragment_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub inodes: u64,
    pub inodes_free: u64,
    pub inodes_avail: u64,
}

/// Establishes authenticated SSH sessions with a running SFTP subsystem
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, config: &SftpConfig) -> Result<Box<dyn SshSession>>;
}

/// One authenticated SSH session plus its SFTP channel.
///
/// Paths are passed to the server as they are. A failed request is reported
/// through the error taxonomy, SFTP status codes keep their
/// [`StatusCode`](super::StatusCode).
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Identification string the server sent, e.g. `SSH-2.0-OpenSSH_9.6`
    fn server_id(&self) -> &str;

    /// `false` once the transport failed or the session was closed. Status
    /// replies of the SFTP server never kill a session.
    fn is_alive(&self) -> bool;

    /// Runs `command` over a throwaway exec channel and returns its stdout
    async fn exec(&self, command: &str) -> Result<String>;

    async fn realpath(&self, path: &str) -> Result<String>;

    /// Every entry of the directory, including "." and ".." if the server
    /// lists them
    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Attributes)>>;

    async fn stat(&self, path: &str) -> Result<Attributes>;

    async fn lstat(&self, path: &str) -> Result<Attributes>;

    async fn setstat(&self, path: &str, attrs: Attributes) -> Result<()>;

    async fn readlink(&self, path: &str) -> Result<String>;

    /// Sends SSH_FXP_SYMLINK with the two paths in the given order
    async fn symlink(&self, first: &str, second: &str) -> Result<()>;

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    async fn rmdir(&self, path: &str) -> Result<()>;

    async fn unlink(&self, path: &str) -> Result<()>;

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// `None` when the server has no statvfs extension
    async fn statvfs(&self, path: &str) -> Result<Option<VolumeStats>>;

    /// Opens a file handle. `mode` applies to files created by this call.
    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Box<dyn RemoteFile>>;
}

/// An open SFTP file handle with its own offset
#[async_trait]
pub trait RemoteFile: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Moves the offset to `pos` and returns it
    async fn seek(&mut self, pos: u64) -> Result<u64>;

    /// Attributes of the open handle
    async fn fstat(&mut self) -> Result<Attributes>;

    async fn close(&mut self) -> Result<()>;
}
