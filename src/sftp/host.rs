use std::sync::{Arc, Weak};

use super::{
    accounts,
    attrs::{wire_time, Attributes},
    file::SftpFile,
    native::NativeConnector,
    os::OsType,
    pool::{ConnectionPool, PooledConnection},
    transport::{SshConnector, SshSession},
    SftpConfig, StatusCode, TAG,
};
use crate::{
    cancel::CancelChecker,
    error::{Error, Result},
    file::File,
    host::{
        DirEntry, EntryType, FetchFlags, Features, Group, Host, HostConfiguration, Stat, StatFlags, StatFs,
        User, S_IFDIR, S_IFMT, S_IFREG,
    },
    listing::{Listing, ListingInput},
    utils,
};

/// Servers known to read the two paths of SSH_FXP_SYMLINK in reverse order
fn has_reversed_symlink_parameters(server_id: &str) -> bool {
    server_id.contains("OpenSSH") || server_id.contains("mod_sftp")
}

/// Working directory of a fresh session. `realpath(".")` is tried first,
/// servers that don't resolve it to an absolute path are asked for `pwd`.
async fn discover_home(session: &dyn SshSession) -> Result<String> {
    match session.realpath(".").await {
        Ok(path) if path.starts_with('/') => return Ok(path),
        Ok(path) => debug!("realpath(\".\") gave a relative path {path:?}"),
        Err(err) => debug!("realpath(\".\") failed: {err}"),
    }

    let output = session.exec("pwd").await?;
    let home = output.strip_suffix('\n').unwrap_or(&output);
    if home.is_empty() {
        return Err(Error::IO("can't determine the home directory".to_owned()));
    }
    Ok(home.to_owned())
}

/// SFTP server exposed as a [`Host`].
///
/// Holds no listing state, every request goes to the server over a pooled
/// session.
pub struct SftpHost {
    weak_self: Weak<SftpHost>,
    config: SftpConfig,
    pool: Arc<ConnectionPool>,
    home_dir: String,
    os_type: OsType,
    reversed_symlink_parameters: bool,
    features: Features,
}

impl SftpHost {
    /// Connects with the built-in `russh` client
    pub async fn connect(config: SftpConfig) -> Result<Arc<Self>> {
        Self::connect_with(config, Arc::new(NativeConnector)).await
    }

    /// Opens the first session, probes the server and keeps the session
    /// pooled for later use
    pub async fn connect_with(config: SftpConfig, connector: Arc<dyn SshConnector>) -> Result<Arc<Self>> {
        let pool = ConnectionPool::new(config.clone(), connector);
        let conn = pool.get_connection().await?;

        let reversed_symlink_parameters = has_reversed_symlink_parameters(conn.server_id());
        let os_type = OsType::detect(&*conn).await;
        let home_dir = if config.home.is_empty() {
            discover_home(&*conn).await?
        } else {
            config.home.clone()
        };
        drop(conn);

        let mut features = Features::SET_OWNERSHIP | Features::SET_PERMISSIONS | Features::SET_TIMES;
        if os_type.is_known() {
            features |= Features::FETCH_USERS | Features::FETCH_GROUPS;
        }

        debug!(
            "connected to {}, home={home_dir}, os={os_type}",
            config.verbose_junction()
        );

        Ok(Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            pool,
            home_dir,
            os_type,
            reversed_symlink_parameters,
            features,
        }))
    }

    pub fn config(&self) -> &SftpConfig {
        &self.config
    }

    pub fn home_dir(&self) -> &str {
        &self.home_dir
    }

    pub fn os_type(&self) -> OsType {
        self.os_type
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn shared(&self) -> Result<Arc<Self>> {
        self.weak_self
            .upgrade()
            .ok_or_else(|| Error::InvalidArgument("host is shutting down".to_owned()))
    }

    async fn connection(&self) -> Result<PooledConnection> {
        self.pool.get_connection().await
    }
}

#[async_trait]
impl Host for SftpHost {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn junction_path(&self) -> &str {
        &self.config.server_url
    }

    fn features(&self) -> Features {
        self.features
    }

    fn configuration(&self) -> HostConfiguration {
        HostConfiguration::Sftp(self.config.clone())
    }

    fn is_writable(&self) -> bool {
        true
    }

    async fn stat(&self, path: &str, flags: StatFlags, _cancel: &CancelChecker) -> Result<Stat> {
        trace!("SftpHost::stat({path}, {flags:?}) called");
        let conn = self.connection().await?;
        let attrs = if flags.contains(StatFlags::NO_FOLLOW) {
            conn.lstat(path).await?
        } else {
            conn.stat(path).await?
        };
        Ok(attrs.to_stat())
    }

    async fn stat_fs(&self, path: &str, _cancel: &CancelChecker) -> Result<StatFs> {
        let conn = self.connection().await?;
        let mut stat = StatFs {
            volume_name: self.junction_path().to_owned(),
            ..Default::default()
        };

        match conn.statvfs(path).await? {
            Some(volume) => {
                stat.total_bytes = volume.blocks.saturating_mul(volume.fragment_size);
                stat.avail_bytes = volume.blocks_avail.saturating_mul(volume.fragment_size);
                stat.free_bytes = volume.blocks_free.saturating_mul(volume.fragment_size);
            }
            None => debug!("{} has no statvfs extension", self.junction_path()),
        }
        Ok(stat)
    }

    async fn fetch_directory_listing(
        &self,
        path: &str,
        flags: FetchFlags,
        cancel: &CancelChecker,
    ) -> Result<Arc<Listing>> {
        trace!("SftpHost::fetch_directory_listing({path}, {flags:?}) called");
        let conn = self.connection().await?;
        let entries = conn.read_dir(path).await?;
        cancel.check()?;

        let host: Arc<dyn Host> = self.shared()?;
        let directory = utils::with_trailing_slash(path);
        let mut input = ListingInput::new(host, &directory);

        let dot_dot = !flags.contains(FetchFlags::NO_DOT_DOT) && directory != "/";
        if dot_dot {
            // slot 0 is taken by the server's own ".." when it lists one
            input.filenames.push("..".to_owned());
            input.unix_modes.push(S_IFDIR | 0o700);
            input.unix_types.push(EntryType::Directory);
        }

        for (name, attrs) in entries {
            let index = match name.as_str() {
                "" | "." => continue,
                ".." if !dot_dot => continue,
                ".." => 0,
                _ => {
                    input.filenames.push(String::new());
                    input.unix_modes.push(0);
                    input.unix_types.push(EntryType::Unknown);
                    input.filenames.len() - 1
                }
            };

            let (mode, entry_type) = match attrs.permissions {
                Some(mode) => (mode, EntryType::from_mode(mode)),
                None => (S_IFREG | 0o400, EntryType::Regular),
            };
            input.filenames[index] = name;
            input.unix_modes[index] = mode;
            input.unix_types[index] = entry_type;

            if mode & S_IFMT != S_IFDIR {
                input.sizes.insert(index, attrs.size.unwrap_or(0));
            }
            input.uids.insert(index, attrs.uid.unwrap_or(0));
            input.gids.insert(index, attrs.gid.unwrap_or(0));

            let atime = i64::from(attrs.atime.unwrap_or(0));
            let mtime = i64::from(attrs.mtime.unwrap_or(0));
            input.atimes.insert(index, atime);
            input.mtimes.insert(index, mtime);
            input.ctimes.insert(index, mtime);
            input.btimes.insert(index, mtime);
        }

        for index in 0..input.filenames.len() {
            if input.unix_types[index] != EntryType::Symlink {
                continue;
            }
            cancel.check()?;

            let path = format!("{directory}{}", input.filenames[index]);
            match conn.readlink(&path).await {
                Ok(target) => input.symlinks.insert(index, target),
                Err(err) => debug!("readlink({path}) failed: {err}"),
            }
            // a dangling link keeps the metadata of the link itself
            if let Ok(target) = conn.stat(&path).await {
                if let Some(mode) = target.permissions {
                    input.unix_modes[index] = mode;
                }
                input.sizes.insert(index, target.size.unwrap_or(0));
            }
        }

        input.validate()?;
        Ok(Listing::build(input))
    }

    async fn iterate_directory_listing(
        &self,
        path: &str,
        visitor: &mut (dyn for<'e> FnMut(&'e DirEntry) -> bool + Send),
    ) -> Result<()> {
        let conn = self.connection().await?;
        let entries = conn.read_dir(path).await?;
        drop(conn);

        for (name, attrs) in entries {
            if name == "." || name == ".." {
                continue;
            }
            let Some(mode) = attrs.permissions else {
                debug!("{name} in {path} has no mode, stopping");
                break;
            };
            let dirent = DirEntry {
                name,
                entry_type: EntryType::from_mode(mode),
            };
            if !visitor(&dirent) {
                break;
            }
        }
        Ok(())
    }

    async fn create_file(&self, path: &str, cancel: &CancelChecker) -> Result<Box<dyn File>> {
        let file = SftpFile::new(path, self.shared()?);
        cancel.check()?;
        Ok(Box::new(file))
    }

    async fn unlink(&self, path: &str, _cancel: &CancelChecker) -> Result<()> {
        self.connection().await?.unlink(path).await
    }

    async fn create_directory(&self, path: &str, mode: u32, _cancel: &CancelChecker) -> Result<()> {
        self.connection().await?.mkdir(path, mode).await
    }

    async fn remove_directory(&self, path: &str, _cancel: &CancelChecker) -> Result<()> {
        self.connection().await?.rmdir(path).await
    }

    /// Servers that refuse to overwrite an existing destination get it
    /// unlinked first, so the replacement is not atomic for them.
    async fn rename(&self, old_path: &str, new_path: &str, cancel: &CancelChecker) -> Result<()> {
        let conn = self.connection().await?;

        match conn.rename(old_path, new_path).await {
            Err(err) if err.sftp_status() == Some(StatusCode::Failure) => {
                if !self.exists(new_path, cancel).await {
                    return Err(err);
                }
                debug!("rename onto existing {new_path} refused ({err}), unlinking it first");
                self.unlink(new_path, cancel).await?;
                conn.rename(old_path, new_path).await
            }
            result => result,
        }
    }

    async fn create_symlink(&self, symlink_path: &str, symlink_value: &str, _cancel: &CancelChecker) -> Result<()> {
        let conn = self.connection().await?;
        if self.reversed_symlink_parameters {
            conn.symlink(symlink_value, symlink_path).await
        } else {
            conn.symlink(symlink_path, symlink_value).await
        }
    }

    async fn read_symlink(&self, path: &str, _cancel: &CancelChecker) -> Result<String> {
        self.connection().await?.readlink(path).await
    }

    async fn set_permissions(&self, path: &str, mode: u32, _cancel: &CancelChecker) -> Result<()> {
        self.connection()
            .await?
            .setstat(path, Attributes::with_permissions(mode))
            .await
    }

    async fn set_ownership(&self, path: &str, uid: u32, gid: u32, _cancel: &CancelChecker) -> Result<()> {
        self.connection()
            .await?
            .setstat(path, Attributes::with_ownership(uid, gid))
            .await
    }

    /// SFTP v3 only knows access and modification times, `btime` and
    /// `ctime` are ignored
    async fn set_times(
        &self,
        path: &str,
        _btime: Option<i64>,
        mtime: Option<i64>,
        _ctime: Option<i64>,
        atime: Option<i64>,
        _cancel: &CancelChecker,
    ) -> Result<()> {
        if mtime.is_none() && atime.is_none() {
            return Ok(());
        }

        let conn = self.connection().await?;
        // both times travel together, the missing one keeps its current value
        let (atime, mtime) = match (atime.map(wire_time), mtime.map(wire_time)) {
            (Some(atime), Some(mtime)) => (atime, mtime),
            (atime, mtime) => {
                let current = conn.lstat(path).await?;
                match (atime.or(current.atime), mtime.or(current.mtime)) {
                    (Some(atime), Some(mtime)) => (atime, mtime),
                    _ => return Err(Error::NotSupported(format!("{path} has no times on the server"))),
                }
            }
        };

        conn.setstat(path, Attributes::with_times(atime, mtime)).await
    }

    async fn fetch_users(&self, _cancel: &CancelChecker) -> Result<Vec<User>> {
        if !self.os_type.is_known() {
            return Err(Error::NotSupported(format!(
                "no such capability on {}",
                self.junction_path()
            )));
        }
        let conn = self.connection().await?;
        accounts::fetch_users(&*conn, self.os_type).await
    }

    async fn fetch_groups(&self, _cancel: &CancelChecker) -> Result<Vec<Group>> {
        if !self.os_type.is_known() {
            return Err(Error::NotSupported(format!(
                "no such capability on {}",
                self.junction_path()
            )));
        }
        let conn = self.connection().await?;
        accounts::fetch_groups(&*conn, self.os_type).await
    }
}
