use russh::{
    client::{self, KeyboardInteractiveAuthResponse},
    keys::{key::PrivateKeyWithHashAlg, PublicKey},
    ChannelMsg,
};
use russh_sftp::{
    client::{error::Error as SftpError, fs::File as SftpFile, SftpSession},
    protocol::{FileAttributes, OpenFlags as WireOpenFlags},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    net::{lookup_host, TcpStream},
    time,
};

use super::{
    attrs::Attributes,
    transport::{RemoteFile, SshConnector, SshSession, VolumeStats},
    SftpConfig, StatusCode, DEFAULT_PORT,
};
use crate::{
    error::{ConnectionStage, Error, Result},
    host::OpenFlags,
};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const SERVER_ID_ATTEMPTS: usize = 50;
const KEYBOARD_INTERACTIVE_ROUNDS: usize = 4;

impl From<FileAttributes> for Attributes {
    fn from(attrs: FileAttributes) -> Self {
        Self {
            size: attrs.size,
            uid: attrs.uid,
            gid: attrs.gid,
            permissions: attrs.permissions,
            atime: attrs.atime,
            mtime: attrs.mtime,
        }
    }
}

impl From<Attributes> for FileAttributes {
    fn from(attrs: Attributes) -> Self {
        Self {
            size: attrs.size,
            uid: attrs.uid,
            user: None,
            gid: attrs.gid,
            group: None,
            permissions: attrs.permissions,
            atime: attrs.atime,
            mtime: attrs.mtime,
        }
    }
}

fn wire_open_flags(flags: OpenFlags) -> WireOpenFlags {
    let mut wire = WireOpenFlags::empty();
    if flags.contains(OpenFlags::READ) {
        wire |= WireOpenFlags::READ;
    }
    if flags.contains(OpenFlags::WRITE) {
        wire |= WireOpenFlags::WRITE;
    }
    if flags.contains(OpenFlags::APPEND) {
        wire |= WireOpenFlags::APPEND;
    }
    if flags.contains(OpenFlags::CREATE) {
        wire |= WireOpenFlags::CREATE;
    }
    if flags.contains(OpenFlags::TRUNCATE) {
        wire |= WireOpenFlags::TRUNCATE;
    }
    if flags.contains(OpenFlags::NO_EXIST) {
        wire |= WireOpenFlags::EXCLUDE;
    }
    wire
}

/// Host keys are accepted as presented
struct AcceptingHandler;

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Reads the identification line of the server without consuming it, so the
/// SSH handshake still sees it
async fn peek_server_id(stream: &TcpStream) -> String {
    let mut buf = [0; 256];
    for _ in 0..SERVER_ID_ATTEMPTS {
        let n = match stream.peek(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let complete = buf[..n].rsplitn(2, |b| *b == b'\n').nth(1);
        let id = complete.and_then(|lines| {
            lines
                .split(|b| *b == b'\n')
                .find(|line| line.starts_with(b"SSH-"))
                .map(|line| String::from_utf8_lossy(line).trim_end().to_owned())
        });
        if let Some(id) = id {
            return id;
        }
        if n == buf.len() {
            break;
        }
        time::sleep(Duration::from_millis(10)).await;
    }

    debug!("server did not identify itself before the handshake");
    String::new()
}

async fn authenticate(handle: &mut client::Handle<AcceptingHandler>, config: &SftpConfig) -> Result<()> {
    let auth_error = |err: russh::Error| Error::connection(ConnectionStage::Authentication, err);
    let user = config.user.as_str();

    if !config.keypath.is_empty() {
        let passphrase = (!config.passwd.is_empty()).then_some(config.passwd.as_str());
        let key = russh::keys::load_secret_key(&config.keypath, passphrase)
            .map_err(|err| Error::connection(ConnectionStage::KeyFile, format!("{}: {err}", config.keypath)))?;

        let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let result = handle.authenticate_publickey(user, key).await.map_err(auth_error)?;
        if !result.success() {
            return Err(Error::connection(
                ConnectionStage::Authentication,
                format!("public key of {user} was rejected"),
            ));
        }
        return Ok(());
    }

    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await
        .map_err(auth_error)?;
    for _ in 0..KEYBOARD_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure { .. } => break,
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                // only a lone prompt is assumed to ask for the password
                let answers = if prompts.len() == 1 {
                    vec![config.passwd.clone()]
                } else {
                    vec![String::new(); prompts.len()]
                };
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(auth_error)?;
            }
        }
    }
    trace!("keyboard-interactive login of {user} failed, trying password");

    let result = handle
        .authenticate_password(user, &config.passwd)
        .await
        .map_err(auth_error)?;
    if result.success() {
        Ok(())
    } else {
        Err(Error::connection(
            ConnectionStage::Authentication,
            format!("password of {user} was rejected"),
        ))
    }
}

/// Connects over TCP and speaks SSH through `russh`, SFTP through
/// `russh-sftp`
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl SshConnector for NativeConnector {
    async fn connect(&self, config: &SftpConfig) -> Result<Box<dyn SshSession>> {
        let port = if config.port == 0 { DEFAULT_PORT } else { config.port };
        debug!("connecting to {}:{port}", config.server_url);

        let addrs = lookup_host((config.server_url.as_str(), port))
            .await
            .map_err(|err| Error::connection(ConnectionStage::Resolve, err))?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(Error::connection(
                ConnectionStage::Resolve,
                format!("{} has no addresses", config.server_url),
            ));
        }

        let stream = TcpStream::connect(&addrs[..])
            .await
            .map_err(|err| Error::connection(ConnectionStage::Connect, err))?;
        let _ = stream.set_nodelay(true);
        let server_id = peek_server_id(&stream).await;

        let ssh_config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        let mut handle = client::connect_stream(Arc::new(ssh_config), stream, AcceptingHandler)
            .await
            .map_err(|err| Error::connection(ConnectionStage::Handshake, err))?;

        authenticate(&mut handle, config).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|err| Error::connection(ConnectionStage::Subsystem, err))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| Error::connection(ConnectionStage::Subsystem, err))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| Error::connection(ConnectionStage::Subsystem, err))?;

        debug!("SFTP session with {} ({server_id}) established", config.server_url);

        Ok(Box::new(NativeSession {
            sftp,
            handle,
            server_id,
            broken: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Fields drop in declaration order: the SFTP channel goes before the SSH
/// session that carries it.
struct NativeSession {
    sftp: SftpSession,
    handle: client::Handle<AcceptingHandler>,
    server_id: String,
    /// Set once a request failed below the SFTP status level
    broken: Arc<AtomicBool>,
}

impl NativeSession {
    fn convert<T>(&self, result: std::result::Result<T, SftpError>, path: &str) -> Result<T> {
        result.map_err(|err| match err {
            SftpError::Status(status) => {
                let code = StatusCode::from(status.status_code as u32);
                let message = if status.error_message.is_empty() {
                    path.to_owned()
                } else {
                    format!("{path}: {}", status.error_message)
                };
                Error::sftp(code, message)
            }
            err => {
                error!("SFTP transport failure on {path}: {err}");
                self.broken.store(true, Ordering::Relaxed);
                Error::IO(err.to_string())
            }
        })
    }
}

#[async_trait]
impl SshSession for NativeSession {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_closed() && !self.broken.load(Ordering::Relaxed)
    }

    async fn exec(&self, command: &str) -> Result<String> {
        trace!("exec {command:?}");
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| Error::IO(format!("can't open a channel for {command:?}: {err}")))?;
        channel
            .exec(true, command)
            .await
            .map_err(|err| Error::IO(format!("can't execute {command:?}: {err}")))?;

        let mut output = Vec::new();
        let drained = time::timeout(EXEC_TIMEOUT, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
                    Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        })
        .await;
        let _ = channel.close().await;

        if drained.is_err() {
            return Err(Error::IO(format!("{command:?} did not finish in time")));
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        self.convert(self.sftp.canonicalize(path).await, path)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Attributes)>> {
        let entries = self.convert(self.sftp.read_dir(path).await, path)?;
        Ok(entries
            .map(|entry| (entry.file_name(), Attributes::from(entry.metadata())))
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Attributes> {
        self.convert(self.sftp.metadata(path).await, path).map(Attributes::from)
    }

    async fn lstat(&self, path: &str) -> Result<Attributes> {
        self.convert(self.sftp.symlink_metadata(path).await, path)
            .map(Attributes::from)
    }

    async fn setstat(&self, path: &str, attrs: Attributes) -> Result<()> {
        self.convert(self.sftp.set_metadata(path, attrs.into()).await, path)
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        self.convert(self.sftp.read_link(path).await, path)
    }

    async fn symlink(&self, first: &str, second: &str) -> Result<()> {
        self.convert(self.sftp.symlink(first, second).await, first)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.convert(self.sftp.create_dir(path).await, path)?;
        if mode != 0 {
            self.setstat(path, Attributes::with_permissions(mode)).await?;
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.convert(self.sftp.remove_dir(path).await, path)
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.convert(self.sftp.remove_file(path).await, path)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.convert(self.sftp.rename(old_path, new_path).await, old_path)
    }

    async fn statvfs(&self, path: &str) -> Result<Option<VolumeStats>> {
        let stats = self.convert(self.sftp.fs_info(path).await, path)?;
        Ok(stats.map(|stats| VolumeStats {
            block_size: stats.block_size,
            fragment_size: stats.fragment_size,
            blocks: stats.blocks,
            blocks_free: stats.blocks_free,
            blocks_avail: stats.blocks_avail,
            inodes: stats.inodes,
            inodes_free: stats.inodes_free,
            inodes_avail: stats.inodes_avail,
        }))
    }

    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Box<dyn RemoteFile>> {
        let file = self.convert(self.sftp.open_with_flags(path, wire_open_flags(flags)).await, path)?;

        // an exclusive open is the only case where the file is known to be new
        if flags.contains(OpenFlags::NO_EXIST) && mode != 0 {
            let attrs = Attributes::with_permissions(mode);
            self.convert(file.set_metadata(attrs.into()).await, path)?;
        }

        Ok(Box::new(NativeFile {
            path: path.to_owned(),
            file,
        }))
    }
}

struct NativeFile {
    path: String,
    file: SftpFile,
}

#[async_trait]
impl RemoteFile for NativeFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf).await?)
    }

    async fn seek(&mut self, pos: u64) -> Result<u64> {
        Ok(self.file.seek(std::io::SeekFrom::Start(pos)).await?)
    }

    async fn fstat(&mut self) -> Result<Attributes> {
        self.file
            .metadata()
            .await
            .map(Attributes::from)
            .map_err(|err| Error::IO(format!("{}: {err}", self.path)))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.file.shutdown().await?)
    }
}

#[cfg(test)]
mod test_native {
    use super::*;

    #[test]
    fn test_wire_open_flags() {
        let flags = wire_open_flags(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::NO_EXIST | OpenFlags::IRUSR);
        assert_eq!(
            flags.bits(),
            (WireOpenFlags::WRITE | WireOpenFlags::CREATE | WireOpenFlags::EXCLUDE).bits()
        );
        assert_eq!(wire_open_flags(OpenFlags::READ).bits(), WireOpenFlags::READ.bits());
    }

    #[test]
    fn test_attributes_conversion() {
        let attrs = Attributes {
            size: Some(3),
            permissions: Some(0o100_644),
            ..Default::default()
        };
        let wire = FileAttributes::from(attrs.clone());
        assert_eq!(wire.uid, None);
        assert_eq!(Attributes::from(wire), attrs);
    }

    #[tokio::test]
    async fn test_peek_server_id() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await?;
            anyhow::Ok(socket)
        });

        let mut stream = TcpStream::connect(addr).await?;
        assert_eq!(peek_server_id(&stream).await, "SSH-2.0-OpenSSH_9.6");

        let mut line = [0; 21];
        let _ = stream.read_exact(&mut line).await?;
        assert_eq!(&line, b"SSH-2.0-OpenSSH_9.6\r\n");
        drop(server.await??);
        Ok(())
    }
}
