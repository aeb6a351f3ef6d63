use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use super::{
    cache::{Cache, Directory},
    client::NativeConnector,
    file::FtpFile,
    parser,
    transport::{FtpConnector, FtpSession},
    url, FtpConfig, TAG,
};
use crate::{
    cancel::CancelChecker,
    error::{Error, Result},
    file::File,
    host::{
        ChangeHandler, DirEntry, DirectoryObservers, EntryType, FetchFlags, Host, HostConfiguration,
        ObservationTicket, Stat, StatFlags, StatFs, S_IFDIR,
    },
    listing::{Listing, ListingInput},
    utils,
};

fn invalid_path(path: &str) -> Error {
    Error::InvalidArgument(format!("{path:?} is not an absolute path"))
}

/// A connection borrowed from the transfer pool of an [`FtpHost`].
///
/// It goes back to the pool when dropped, unless it died in the meantime.
pub(crate) struct IoLease {
    host: Arc<FtpHost>,
    dir: String,
    session: Option<Box<dyn FtpSession>>,
}

impl IoLease {
    pub fn session(&mut self) -> Result<&mut (dyn FtpSession + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| Error::InvalidArgument("connection was already returned".to_owned()))
    }

    pub fn host(&self) -> &Arc<FtpHost> {
        &self.host
    }
}

impl Drop for IoLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.host.commit_io_session(&self.dir, session);
        }
    }
}

/// FTP server exposed as a [`Host`].
///
/// Listings are served from a [`Cache`] that is refreshed over a dedicated
/// listing connection. Transfers and mutating commands run over connections
/// borrowed from a pool keyed by the directory they were last used in.
pub struct FtpHost {
    weak_self: Weak<FtpHost>,
    config: FtpConfig,
    connector: Arc<dyn FtpConnector>,
    cache: Cache,
    observers: Arc<DirectoryObservers>,
    listing_session: tokio::sync::Mutex<Option<Box<dyn FtpSession>>>,
    io_sessions: Mutex<HashMap<String, Box<dyn FtpSession>>>,
}

impl FtpHost {
    /// Connects with the built-in client and caches the start directory
    pub async fn connect(config: FtpConfig) -> Result<Arc<Self>> {
        Self::connect_with(config, Arc::new(NativeConnector)).await
    }

    pub async fn connect_with(config: FtpConfig, connector: Arc<dyn FtpConnector>) -> Result<Arc<Self>> {
        let observers = DirectoryObservers::new();
        let host = Arc::new_cyclic(|weak_self| {
            let notify = observers.clone();
            Self {
                weak_self: weak_self.clone(),
                config,
                connector,
                cache: Cache::with_callback(move |dir| notify.notify(dir)),
                observers,
                listing_session: tokio::sync::Mutex::new(None),
                io_sessions: Mutex::new(HashMap::new()),
            }
        });

        let start_dir = if host.config.start_dir.is_empty() {
            "/".to_owned()
        } else {
            utils::with_trailing_slash(&host.config.start_dir)
        };
        let _ = host
            .download_and_cache_listing(&start_dir, &CancelChecker::none())
            .await?;

        Ok(host)
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn shared(&self) -> Result<Arc<Self>> {
        self.weak_self
            .upgrade()
            .ok_or_else(|| Error::InvalidArgument("host is shutting down".to_owned()))
    }

    /// Full `ftp://` location of `path` on this server
    pub fn build_full_url(&self, path: &str) -> Result<String> {
        url::build_full_url(self.junction_path(), path)
    }

    async fn download_listing(&self, path: &str, cancel: &CancelChecker) -> Result<Vec<u8>> {
        trace!("FtpHost::download_listing({path}) called");

        let request = self.build_full_url(path)?;
        trace!("Request: {request}");

        let mut guard = self.listing_session.lock().await;
        let session = match guard.take() {
            Some(session) if session.is_alive() => session,
            _ => {
                debug!("opening listing connection to {}", self.config.verbose_junction());
                self.connector.connect(&self.config).await?
            }
        };
        let session = guard.insert(session);

        session.list(utils::without_trailing_slash(path), cancel).await
    }

    /// Downloads and parses the listing of `path` and replaces its cached
    /// snapshot. Nothing is cached if the download fails or gets cancelled.
    async fn download_and_cache_listing(&self, path: &str, cancel: &CancelChecker) -> Result<Arc<Directory>> {
        if !path.starts_with('/') {
            return Err(invalid_path(path));
        }
        let path = utils::with_trailing_slash(path);

        let data = self.download_listing(&path, cancel).await?;
        cancel.check()?;

        let directory = parser::parse_listing(&String::from_utf8_lossy(&data));
        let directory = self.cache.insert_list_directory(&path, directory);
        self.observers.notify(&path);

        Ok(directory)
    }

    async fn listing_for_fetching(&self, path: &str, cancel: &CancelChecker) -> Result<Arc<Directory>> {
        if !path.starts_with('/') {
            return Err(invalid_path(path));
        }

        match self.cache.find_directory(path) {
            Some(dir) if !dir.is_outdated() && !dir.has_dirty_items => Ok(dir),
            _ => self.download_and_cache_listing(path, cancel).await,
        }
    }

    fn take_io_session(&self, dir: &str) -> Option<Box<dyn FtpSession>> {
        let mut pool = self.io_sessions.lock();
        pool.retain(|_, session| session.is_alive());

        if let Some(session) = pool.remove(dir) {
            return Some(session);
        }
        let any = pool.keys().next().cloned()?;
        pool.remove(&any)
    }

    /// Borrows a transfer connection, preferring one already sitting in `dir`
    pub(crate) async fn io_session_at(self: &Arc<Self>, dir: &str) -> Result<IoLease> {
        let dir = utils::with_trailing_slash(dir);

        let session = match self.take_io_session(&dir) {
            Some(session) => session,
            None => {
                debug!("spawning transfer connection for {dir}");
                self.connector.connect(&self.config).await?
            }
        };

        Ok(IoLease {
            host: self.clone(),
            dir,
            session: Some(session),
        })
    }

    fn commit_io_session(&self, dir: &str, mut session: Box<dyn FtpSession>) {
        session.reset();
        if !session.is_alive() {
            debug!("dropping dead transfer connection used in {dir}");
            return;
        }
        let _ = self.io_sessions.lock().insert(dir.to_owned(), session);
    }

    /// Number of idle transfer connections
    pub fn idle_connections(&self) -> usize {
        self.io_sessions.lock().len()
    }

    /// Runs `commands` from inside `dir`. Each command comes with the path a
    /// 550 reply refers to.
    async fn execute_at(&self, dir: &str, commands: &[(String, Option<&str>)]) -> Result<()> {
        let mut lease = self.shared()?.io_session_at(dir).await?;
        let session = lease.session()?;

        session.change_dir(utils::without_trailing_slash(dir)).await?;
        for (command, path) in commands {
            let _ = session.command(command).await?.check(*path)?;
        }
        Ok(())
    }
}

fn root_stat() -> Stat {
    let now = utils::now();
    Stat {
        mode: S_IFDIR | 0o600,
        size: Some(0),
        atime: Some(now),
        mtime: Some(now),
        ctime: Some(now),
        btime: Some(now),
        ..Default::default()
    }
}

#[async_trait]
impl Host for FtpHost {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn junction_path(&self) -> &str {
        &self.config.server_url
    }

    fn configuration(&self) -> HostConfiguration {
        HostConfiguration::Ftp(self.config.clone())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn is_directory_change_observation_available(&self, _path: &str) -> bool {
        true
    }

    fn observe_directory_changes(&self, path: &str, handler: ChangeHandler) -> Option<ObservationTicket> {
        if !path.starts_with('/') {
            return None;
        }
        Some(self.observers.observe(path, handler))
    }

    async fn stat(&self, path: &str, flags: StatFlags, cancel: &CancelChecker) -> Result<Stat> {
        trace!("FtpHost::stat({path}, {flags:?}) called");
        if !path.starts_with('/') {
            warn!("stat called with a relative path {path:?}");
            return Err(invalid_path(path));
        }

        let path = utils::without_trailing_slash(path);
        let Some((parent, filename)) = utils::split_path(path) else {
            return Ok(root_stat());
        };

        if !flags.contains(StatFlags::FORCE_REFRESH) {
            if let Some(dir) = self.cache.find_directory(parent) {
                trace!("found cached directory {parent}, outdated={}", dir.is_outdated());
                match dir.entry_by_name(filename) {
                    Some(entry) if !entry.dirty => return Ok(entry.to_stat()),
                    Some(_) => {}
                    None if !dir.is_outdated() => return Err(Error::NotFound(path.to_owned())),
                    None => {}
                }
            }
        }

        // the entry may be freshly created, only a new listing can tell
        let dir = self.download_and_cache_listing(parent, cancel).await?;
        dir.entry_by_name(filename)
            .map(|entry| entry.to_stat())
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }

    async fn stat_fs(&self, _path: &str, _cancel: &CancelChecker) -> Result<StatFs> {
        Ok(StatFs {
            volume_name: self.junction_path().to_owned(),
            ..Default::default()
        })
    }

    async fn fetch_directory_listing(
        &self,
        path: &str,
        flags: FetchFlags,
        cancel: &CancelChecker,
    ) -> Result<Arc<Listing>> {
        if flags.contains(FetchFlags::FORCE_REFRESH) {
            self.cache.mark_directory_dirty(path);
        }

        let dir = self.listing_for_fetching(path, cancel).await?;

        let host: Arc<dyn Host> = self.shared()?;
        let directory = utils::with_trailing_slash(path);
        let mut input = ListingInput::new(host, &directory);

        if !flags.contains(FetchFlags::NO_DOT_DOT) && directory != "/" {
            let now = utils::now();
            input.filenames.push("..".to_owned());
            input.unix_types.push(EntryType::Directory);
            input.unix_modes.push(S_IFDIR | 0o600);
            for times in [&mut input.atimes, &mut input.mtimes, &mut input.ctimes, &mut input.btimes] {
                times.insert(0, now);
            }
        }

        for entry in &dir.entries {
            let index = input.filenames.len();
            input.filenames.push(entry.name.clone());
            input.unix_types.push(EntryType::from_mode(entry.mode));
            input.unix_modes.push(entry.mode);
            if entry.mode & S_IFDIR == 0 {
                input.sizes.insert(index, entry.size);
            }
            for times in [&mut input.atimes, &mut input.mtimes, &mut input.ctimes, &mut input.btimes] {
                times.insert(index, entry.time);
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
        let dir = self.listing_for_fetching(path, &CancelChecker::none()).await?;

        for entry in &dir.entries {
            let dirent = DirEntry {
                name: entry.name.clone(),
                entry_type: EntryType::from_mode(entry.mode),
            };
            if !visitor(&dirent) {
                break;
            }
        }
        Ok(())
    }

    async fn create_file(&self, path: &str, cancel: &CancelChecker) -> Result<Box<dyn File>> {
        let file = FtpFile::new(path, self.shared()?);
        cancel.check()?;
        Ok(Box::new(file))
    }

    async fn unlink(&self, path: &str, _cancel: &CancelChecker) -> Result<()> {
        if path.ends_with('/') {
            return Err(Error::InvalidArgument(format!("{path:?} names a directory")));
        }
        let (parent, filename) = utils::split_path(path).ok_or_else(|| invalid_path(path))?;

        self.execute_at(parent, &[(format!("DELE {filename}"), Some(path))])
            .await?;
        self.cache.commit_unlink(path);
        Ok(())
    }

    /// `mode` is ignored, FTP has no way to pass it
    async fn create_directory(&self, path: &str, _mode: u32, _cancel: &CancelChecker) -> Result<()> {
        let path = utils::without_trailing_slash(path);
        let (parent, name) = utils::split_path(path).ok_or_else(|| invalid_path(path))?;

        self.execute_at(parent, &[(format!("MKD {name}"), None)]).await?;
        self.cache.commit_mkd(path);
        Ok(())
    }

    async fn remove_directory(&self, path: &str, _cancel: &CancelChecker) -> Result<()> {
        let path = utils::without_trailing_slash(path);
        let (parent, name) = utils::split_path(path).ok_or_else(|| invalid_path(path))?;

        self.execute_at(parent, &[(format!("RMD {name}"), Some(path))])
            .await?;
        self.cache.commit_rmd(path);
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str, _cancel: &CancelChecker) -> Result<()> {
        let old_path = utils::without_trailing_slash(old_path);
        let new_path = utils::without_trailing_slash(new_path);
        if !new_path.starts_with('/') {
            return Err(invalid_path(new_path));
        }
        let (old_parent, _) = utils::split_path(old_path).ok_or_else(|| invalid_path(old_path))?;

        let commands = [
            (format!("RNFR {old_path}"), Some(old_path)),
            (format!("RNTO {new_path}"), None),
        ];
        self.execute_at(old_parent, &commands).await?;
        self.cache.commit_rename(old_path, new_path);
        Ok(())
    }
}
