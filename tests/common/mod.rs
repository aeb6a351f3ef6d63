#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use netvfs::{
    ftp::{DataReader, DataWriter, FtpConfig, FtpConnector, FtpSession, Reply},
    host::{OpenFlags, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG},
    sftp::{Attributes, RemoteFile, SftpConfig, SshConnector, SshSession, StatusCode, VolumeStats},
    utils, CancelChecker, Error, Result,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// FTP

/// Server side state shared by every fake FTP connection
#[derive(Default)]
pub struct FtpServer {
    /// Raw `LIST` output keyed by directory with trailing slash
    pub listings: Mutex<HashMap<String, String>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub list_calls: AtomicUsize,
    pub connections: AtomicUsize,
    /// Every command sent over a transfer connection, in order
    pub commands: Mutex<Vec<String>>,
    pub kill_switches: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FtpServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_listing(&self, dir: &str, text: &str) {
        let _ = self
            .listings
            .lock()
            .insert(utils::with_trailing_slash(dir), text.to_owned());
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let _ = self.files.lock().insert(path.to_owned(), data.to_vec());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Kills every connection opened so far
    pub fn kill_all(&self) {
        for switch in self.kill_switches.lock().iter() {
            switch.store(false, Ordering::SeqCst);
        }
    }
}

pub struct FakeFtpConnector(pub Arc<FtpServer>);

#[async_trait]
impl FtpConnector for FakeFtpConnector {
    async fn connect(&self, _config: &FtpConfig) -> Result<Box<dyn FtpSession>> {
        let _ = self.0.connections.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.0.kill_switches.lock().push(alive.clone());
        Ok(Box::new(FakeFtpSession {
            server: self.0.clone(),
            working_dir: None,
            alive,
        }))
    }
}

pub struct FakeFtpSession {
    server: Arc<FtpServer>,
    working_dir: Option<String>,
    alive: Arc<AtomicBool>,
}

/// Upload stream that lands in [`FtpServer::files`] as bytes arrive
struct UploadSink {
    server: Arc<FtpServer>,
    path: String,
}

impl AsyncWrite for UploadSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.server
            .files
            .lock()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl FtpSession for FakeFtpSession {
    fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    async fn change_dir(&mut self, dir: &str) -> Result<()> {
        self.working_dir = Some(dir.to_owned());
        Ok(())
    }

    async fn list(&mut self, dir: &str, _cancel: &CancelChecker) -> Result<Vec<u8>> {
        let _ = self.server.list_calls.fetch_add(1, Ordering::SeqCst);
        let key = utils::with_trailing_slash(dir);
        match self.server.listings.lock().get(&key) {
            Some(text) => Ok(text.clone().into_bytes()),
            None => Err(Error::NotFound(dir.to_owned())),
        }
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        self.server.commands.lock().push(command.to_owned());
        if let Some(name) = command.strip_prefix("DELE ") {
            let dir = self.working_dir.clone().unwrap_or_else(|| "/".to_owned());
            let removed = self.server.files.lock().remove(&utils::join(&dir, name));
            if removed.is_none() {
                return Ok(Reply::new(550, "No such file"));
            }
        }
        Ok(Reply::new(250, "OK"))
    }

    async fn retrieve(&mut self, path: &str, offset: u64) -> Result<DataReader> {
        let data = self
            .server
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        let start = usize::try_from(offset).unwrap().min(data.len());
        Ok(Box::new(io::Cursor::new(data[start..].to_vec())))
    }

    async fn store(&mut self, path: &str, append: bool) -> Result<DataWriter> {
        if !append {
            let _ = self.server.files.lock().insert(path.to_owned(), Vec::new());
        }
        Ok(Box::new(UploadSink {
            server: self.server.clone(),
            path: path.to_owned(),
        }))
    }

    async fn finish_transfer(&mut self) -> Result<()> {
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

// SFTP

#[derive(Debug, Clone)]
pub enum Node {
    File { data: Vec<u8>, attrs: Attributes },
    Dir { attrs: Attributes },
    Link { target: String, attrs: Attributes },
}

impl Node {
    pub fn attrs(&self) -> Attributes {
        match self {
            Self::File { data, attrs } => Attributes {
                size: Some(data.len() as u64),
                ..attrs.clone()
            },
            Self::Dir { attrs } | Self::Link { attrs, .. } => attrs.clone(),
        }
    }
}

fn node_attrs(mode: u32) -> Attributes {
    Attributes {
        size: Some(0),
        uid: Some(1000),
        gid: Some(1000),
        permissions: Some(mode),
        atime: Some(1_600_000_000),
        mtime: Some(1_700_000_000),
    }
}

fn parent_of(path: &str) -> &str {
    utils::split_path(path).map_or("/", |(dir, _)| utils::without_trailing_slash(dir))
}

fn status(code: StatusCode, _path: &str) -> Error {
    Error::from(code)
}

/// In-memory file tree plus knobs that make a fake SSH server behave like
/// a particular real one
pub struct SshServer {
    pub nodes: Mutex<BTreeMap<String, Node>>,
    pub server_id: String,
    pub uname: Option<String>,
    pub home: Option<String>,
    /// Symlink request reads `(target, link)` instead of `(link, target)`
    pub reversed_symlink: bool,
    /// Rename fails with `Failure` when the destination exists
    pub refuses_overwrite: bool,
    pub statvfs: Option<VolumeStats>,
    pub commands: Mutex<HashMap<String, String>>,
    pub connections: AtomicUsize,
    pub setstat_calls: Mutex<Vec<(String, Attributes)>>,
    pub kill_switches: Mutex<Vec<Arc<AtomicBool>>>,
    /// Paths whose removal is refused with `PermissionDenied`
    pub protected: Mutex<Vec<String>>,
}

impl Default for SshServer {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        let _ = nodes.insert(
            "/".to_owned(),
            Node::Dir {
                attrs: node_attrs(S_IFDIR | 0o755),
            },
        );
        Self {
            nodes: Mutex::new(nodes),
            server_id: "SSH-2.0-OpenSSH_9.6".to_owned(),
            uname: Some("Linux\n".to_owned()),
            home: Some("/home/anna".to_owned()),
            reversed_symlink: true,
            refuses_overwrite: false,
            statvfs: None,
            commands: Mutex::new(HashMap::new()),
            connections: AtomicUsize::new(0),
            setstat_calls: Mutex::new(Vec::new()),
            kill_switches: Mutex::new(Vec::new()),
            protected: Mutex::new(Vec::new()),
        }
    }
}

impl SshServer {
    pub fn add_dir(&self, path: &str) {
        let _ = self.nodes.lock().insert(
            path.to_owned(),
            Node::Dir {
                attrs: node_attrs(S_IFDIR | 0o755),
            },
        );
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let _ = self.nodes.lock().insert(
            path.to_owned(),
            Node::File {
                data: data.to_vec(),
                attrs: node_attrs(S_IFREG | 0o644),
            },
        );
    }

    pub fn add_link(&self, path: &str, target: &str) {
        let _ = self.nodes.lock().insert(
            path.to_owned(),
            Node::Link {
                target: target.to_owned(),
                attrs: node_attrs(S_IFLNK | 0o777),
            },
        );
    }

    pub fn add_command(&self, command: &str, output: &str) {
        let _ = self
            .commands
            .lock()
            .insert(command.to_owned(), output.to_owned());
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.nodes.lock().get(path).cloned()
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        match self.node(path)? {
            Node::File { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Kills every connection opened so far
    pub fn kill_all(&self) {
        for switch in self.kill_switches.lock().iter() {
            switch.store(false, Ordering::SeqCst);
        }
    }

    fn resolve(&self, path: &str) -> Option<Node> {
        let mut path = path.to_owned();
        for _ in 0..8 {
            match self.node(&path)? {
                Node::Link { target, .. } => {
                    path = if target.starts_with('/') {
                        target
                    } else {
                        utils::join(parent_of(&path), &target)
                    };
                }
                node => return Some(node),
            }
        }
        None
    }
}

pub struct FakeSshConnector(pub Arc<SshServer>);

#[async_trait]
impl SshConnector for FakeSshConnector {
    async fn connect(&self, _config: &SftpConfig) -> Result<Box<dyn SshSession>> {
        let _ = self.0.connections.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.0.kill_switches.lock().push(alive.clone());
        Ok(Box::new(FakeSshSession {
            server: self.0.clone(),
            alive,
        }))
    }
}

pub struct FakeSshSession {
    server: Arc<SshServer>,
    alive: Arc<AtomicBool>,
}

impl FakeSshSession {
    fn normalize(path: &str) -> String {
        utils::without_trailing_slash(path).to_owned()
    }
}

#[async_trait]
impl SshSession for FakeSshSession {
    fn server_id(&self) -> &str {
        &self.server.server_id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn exec(&self, command: &str) -> Result<String> {
        if command == "uname -s" {
            return self
                .server
                .uname
                .clone()
                .ok_or_else(|| Error::IO("exec refused".to_owned()));
        }
        if command == "pwd" {
            return Ok(format!("{}\n", self.server.home.clone().unwrap_or_default()));
        }
        self.server
            .commands
            .lock()
            .get(command)
            .cloned()
            .ok_or_else(|| Error::IO(format!("{command}: not found")))
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        match (&self.server.home, path) {
            (Some(home), ".") => Ok(home.clone()),
            (None, ".") => Ok(".".to_owned()),
            _ => Ok(path.to_owned()),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Attributes)>> {
        let dir = Self::normalize(path);
        let Some(Node::Dir { attrs }) = self.server.node(&dir) else {
            return Err(status(StatusCode::NoSuchFile, path));
        };

        let mut entries = vec![(".".to_owned(), attrs.clone()), ("..".to_owned(), attrs)];
        for (node_path, node) in self.server.nodes.lock().iter() {
            if node_path != "/" && parent_of(node_path) == dir {
                if let Some((_, name)) = utils::split_path(node_path) {
                    entries.push((name.to_owned(), node.attrs()));
                }
            }
        }
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Attributes> {
        self.server
            .resolve(&Self::normalize(path))
            .map(|node| node.attrs())
            .ok_or_else(|| status(StatusCode::NoSuchFile, path))
    }

    async fn lstat(&self, path: &str) -> Result<Attributes> {
        self.server
            .node(&Self::normalize(path))
            .map(|node| node.attrs())
            .ok_or_else(|| status(StatusCode::NoSuchFile, path))
    }

    async fn setstat(&self, path: &str, changes: Attributes) -> Result<()> {
        let path = Self::normalize(path);
        self.server
            .setstat_calls
            .lock()
            .push((path.clone(), changes.clone()));

        let mut nodes = self.server.nodes.lock();
        let node = nodes
            .get_mut(&path)
            .ok_or_else(|| status(StatusCode::NoSuchFile, &path))?;
        let attrs = match node {
            Node::File { attrs, .. } | Node::Dir { attrs } | Node::Link { attrs, .. } => attrs,
        };
        if let Some(mode) = changes.permissions {
            let kind = attrs.permissions.unwrap_or(0) & S_IFMT;
            attrs.permissions = Some(kind | (mode & !S_IFMT));
        }
        if changes.uid.is_some() {
            attrs.uid = changes.uid;
            attrs.gid = changes.gid;
        }
        if changes.mtime.is_some() {
            attrs.atime = changes.atime;
            attrs.mtime = changes.mtime;
        }
        Ok(())
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        match self.server.node(&Self::normalize(path)) {
            Some(Node::Link { target, .. }) => Ok(target),
            Some(_) => Err(status(StatusCode::Failure, path)),
            None => Err(status(StatusCode::NoSuchFile, path)),
        }
    }

    async fn symlink(&self, first: &str, second: &str) -> Result<()> {
        let (link, target) = if self.server.reversed_symlink {
            (second, first)
        } else {
            (first, second)
        };
        self.server.add_link(&Self::normalize(link), target);
        Ok(())
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let path = Self::normalize(path);
        if self.server.node(&path).is_some() {
            return Err(status(StatusCode::Failure, &path));
        }
        let _ = self.server.nodes.lock().insert(
            path,
            Node::Dir {
                attrs: node_attrs(S_IFDIR | mode),
            },
        );
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize(path);
        let mut nodes = self.server.nodes.lock();
        if nodes.keys().any(|p| p != "/" && parent_of(p) == path) {
            return Err(status(StatusCode::Failure, &path));
        }
        match nodes.remove(&path) {
            Some(_) => Ok(()),
            None => Err(status(StatusCode::NoSuchFile, &path)),
        }
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        if self.server.protected.lock().iter().any(|p| *p == Self::normalize(path)) {
            return Err(status(StatusCode::PermissionDenied, path));
        }
        match self.server.nodes.lock().remove(&Self::normalize(path)) {
            Some(_) => Ok(()),
            None => Err(status(StatusCode::NoSuchFile, path)),
        }
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (old_path, new_path) = (Self::normalize(old_path), Self::normalize(new_path));
        let mut nodes = self.server.nodes.lock();
        if self.server.refuses_overwrite && nodes.contains_key(&new_path) {
            return Err(status(StatusCode::Failure, &new_path));
        }
        let node = nodes
            .remove(&old_path)
            .ok_or_else(|| status(StatusCode::NoSuchFile, &old_path))?;
        let _ = nodes.insert(new_path, node);
        Ok(())
    }

    async fn statvfs(&self, _path: &str) -> Result<Option<VolumeStats>> {
        Ok(self.server.statvfs)
    }

    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Box<dyn RemoteFile>> {
        let path = Self::normalize(path);
        let exists = self.server.node(&path).is_some();

        if flags.contains(OpenFlags::NO_EXIST) && exists {
            return Err(status(StatusCode::Failure, &path));
        }
        if !exists {
            if !flags.contains(OpenFlags::CREATE) {
                return Err(status(StatusCode::NoSuchFile, &path));
            }
            let _ = self.server.nodes.lock().insert(
                path.clone(),
                Node::File {
                    data: Vec::new(),
                    attrs: node_attrs(S_IFREG | if mode == 0 { 0o644 } else { mode }),
                },
            );
        } else if flags.contains(OpenFlags::TRUNCATE) {
            if let Some(Node::File { data, .. }) = self.server.nodes.lock().get_mut(&path) {
                data.clear();
            }
        }

        Ok(Box::new(FakeRemoteFile {
            server: self.server.clone(),
            path,
            pos: 0,
        }))
    }
}

pub struct FakeRemoteFile {
    server: Arc<SshServer>,
    path: String,
    pos: u64,
}

#[async_trait]
impl RemoteFile for FakeRemoteFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self
            .server
            .file_data(&self.path)
            .ok_or_else(|| status(StatusCode::NoSuchFile, &self.path))?;
        let start = usize::try_from(self.pos).unwrap().min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut nodes = self.server.nodes.lock();
        let Some(Node::File { data, .. }) = nodes.get_mut(&self.path) else {
            return Err(status(StatusCode::NoSuchFile, &self.path));
        };
        let start = usize::try_from(self.pos).unwrap();
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: u64) -> Result<u64> {
        self.pos = pos;
        Ok(pos)
    }

    async fn fstat(&mut self) -> Result<Attributes> {
        self.server
            .node(&self.path)
            .map(|node| node.attrs())
            .ok_or_else(|| status(StatusCode::NoSuchFile, &self.path))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
