mod flags;
mod observer;
mod stat;

pub use flags::{FetchFlags, Features, OpenFlags, StatFlags};
pub use observer::{ChangeHandler, DirectoryObservers, ObservationTicket};
pub use stat::*;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    cancel::CancelChecker,
    error::{Error, Result},
    file::File,
    ftp::FtpConfig,
    listing::Listing,
    sftp::SftpConfig,
};

/// Identity of a host's connection, compared to detect "the same server"
/// across reconnects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostConfiguration {
    Ftp(FtpConfig),
    Sftp(SftpConfig),
}

impl HostConfiguration {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ftp(_) => crate::ftp::TAG,
            Self::Sftp(_) => crate::sftp::TAG,
        }
    }

    pub fn verbose_junction(&self) -> String {
        match self {
            Self::Ftp(config) => config.verbose_junction(),
            Self::Sftp(config) => config.verbose_junction(),
        }
    }
}

macro_rules! not_supported {
    ($name:expr) => {
        Err(Error::NotSupported(format!("{} is not supported by this host", $name)))
    };
}

/// Filesystem rooted at one location.
///
/// Every backend implements this trait, callers hold `Arc<dyn Host>` and
/// never rely on the concrete type. Operations that a backend cannot
/// perform return [`Error::NotSupported`].
#[async_trait]
pub trait Host: Send + Sync {
    /// Short backend identifier, e.g. `"net_ftp"`
    fn tag(&self) -> &'static str;

    /// Location of this host relative to its parent
    fn junction_path(&self) -> &str;

    fn parent(&self) -> Option<Arc<dyn Host>> {
        None
    }

    fn features(&self) -> Features {
        Features::empty()
    }

    fn configuration(&self) -> HostConfiguration;

    fn is_writable(&self) -> bool {
        false
    }

    fn is_directory_change_observation_available(&self, _path: &str) -> bool {
        false
    }

    /// Subscribes to changes of `path`. Returns `None` if the host cannot
    /// observe that directory.
    fn observe_directory_changes(
        &self,
        _path: &str,
        _handler: ChangeHandler,
    ) -> Option<ObservationTicket> {
        None
    }

    async fn stat(&self, path: &str, flags: StatFlags, cancel: &CancelChecker) -> Result<Stat>;

    async fn exists(&self, path: &str, cancel: &CancelChecker) -> bool {
        self.stat(path, StatFlags::empty(), cancel).await.is_ok()
    }

    async fn stat_fs(&self, _path: &str, _cancel: &CancelChecker) -> Result<StatFs> {
        not_supported!("StatFS")
    }

    async fn fetch_directory_listing(
        &self,
        path: &str,
        flags: FetchFlags,
        cancel: &CancelChecker,
    ) -> Result<Arc<Listing>>;

    /// Enumerates `path` without building a listing. Stops early once the
    /// visitor returns `false`.
    async fn iterate_directory_listing(
        &self,
        path: &str,
        visitor: &mut (dyn for<'e> FnMut(&'e DirEntry) -> bool + Send),
    ) -> Result<()>;

    /// Creates an unopened file object for `path`
    async fn create_file(&self, path: &str, cancel: &CancelChecker) -> Result<Box<dyn File>>;

    async fn unlink(&self, _path: &str, _cancel: &CancelChecker) -> Result<()> {
        not_supported!("Unlink")
    }

    async fn create_directory(&self, _path: &str, _mode: u32, _cancel: &CancelChecker) -> Result<()> {
        not_supported!("CreateDirectory")
    }

    async fn remove_directory(&self, _path: &str, _cancel: &CancelChecker) -> Result<()> {
        not_supported!("RemoveDirectory")
    }

    async fn rename(&self, _old_path: &str, _new_path: &str, _cancel: &CancelChecker) -> Result<()> {
        not_supported!("Rename")
    }

    async fn create_symlink(
        &self,
        _symlink_path: &str,
        _symlink_value: &str,
        _cancel: &CancelChecker,
    ) -> Result<()> {
        not_supported!("CreateSymlink")
    }

    async fn read_symlink(&self, _path: &str, _cancel: &CancelChecker) -> Result<String> {
        not_supported!("ReadSymlink")
    }

    async fn set_permissions(&self, _path: &str, _mode: u32, _cancel: &CancelChecker) -> Result<()> {
        not_supported!("SetPermissions")
    }

    async fn set_ownership(
        &self,
        _path: &str,
        _uid: u32,
        _gid: u32,
        _cancel: &CancelChecker,
    ) -> Result<()> {
        not_supported!("SetOwnership")
    }

    /// Updates timestamps. `None` leaves the corresponding time untouched.
    async fn set_times(
        &self,
        _path: &str,
        _btime: Option<i64>,
        _mtime: Option<i64>,
        _ctime: Option<i64>,
        _atime: Option<i64>,
        _cancel: &CancelChecker,
    ) -> Result<()> {
        not_supported!("SetTimes")
    }

    async fn set_flags(
        &self,
        _path: &str,
        _flags: u32,
        _vfs_flags: StatFlags,
        _cancel: &CancelChecker,
    ) -> Result<()> {
        not_supported!("SetFlags")
    }

    async fn fetch_users(&self, _cancel: &CancelChecker) -> Result<Vec<User>> {
        not_supported!("FetchUsers")
    }

    async fn fetch_groups(&self, _cancel: &CancelChecker) -> Result<Vec<Group>> {
        not_supported!("FetchGroups")
    }
}
