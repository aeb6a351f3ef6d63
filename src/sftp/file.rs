use std::{io::SeekFrom, sync::Arc};
use tokio::runtime::Handle;

use super::{host::SftpHost, pool::PooledConnection, transport::RemoteFile};
use crate::{
    cancel::CancelChecker,
    error::{Error, Result},
    file::{self, File, Paradigm},
    host::OpenFlags,
};

/// Server handle together with the session it was opened on. The handle is
/// declared first so it is gone before the session goes back to the pool.
struct OpenState {
    handle: Box<dyn RemoteFile>,
    conn: PooledConnection,
}

impl OpenState {
    async fn finish(mut self, path: &str) -> Result<()> {
        let result = self.handle.close().await;
        if let Err(err) = &result {
            debug!("closing {path} failed: {err}");
        }
        drop(self.conn);
        result
    }
}

/// File on an SFTP server, backed by one server handle while opened.
///
/// Keeps its own cursor and a high-water size that grows with every write
/// past the end.
pub struct SftpFile {
    path: String,
    host: Arc<SftpHost>,
    state: Option<OpenState>,
    pos: u64,
    size: u64,
}

impl SftpFile {
    pub(crate) fn new(path: &str, host: Arc<SftpHost>) -> Self {
        trace!("SftpFile::new({path}) called");
        Self {
            path: path.to_owned(),
            host,
            state: None,
            pos: 0,
            size: 0,
        }
    }

    fn not_opened(&self) -> Error {
        Error::InvalidArgument(format!("{} is not opened", self.path))
    }

    fn opened(&mut self) -> Result<&mut OpenState> {
        match self.state.as_mut() {
            Some(state) => Ok(state),
            None => Err(Error::InvalidArgument(format!("{} is not opened", self.path))),
        }
    }
}

#[async_trait]
impl File for SftpFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn open(&mut self, flags: OpenFlags, cancel: &CancelChecker) -> Result<()> {
        trace!("SftpFile::open({}, {flags:?}) called", self.path);
        if self.is_opened() {
            self.close().await?;
        }

        let conn = self.host.pool().get_connection().await?;
        cancel.check()?;
        let mut handle = conn.open(&self.path, flags, flags.mode()).await?;

        let attrs = match handle.fstat().await {
            Ok(attrs) => attrs,
            Err(err) => {
                let _ = handle.close().await;
                return Err(err);
            }
        };

        self.pos = 0;
        self.size = attrs.size.unwrap_or(0);
        self.state = Some(OpenState { handle, conn });
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.state.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        trace!("SftpFile::close({}) called", self.path);
        self.pos = 0;
        self.size = 0;
        match self.state.take() {
            Some(state) => state.finish(&self.path).await,
            None => Ok(()),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self.opened()?.handle.read(buf).await?;
        self.pos += read as u64;
        Ok(read)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.opened()?.handle.write(buf).await?;
        self.pos += written as u64;
        self.size = self.size.max(self.pos);
        Ok(written)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = file::resolve_seek(pos, self.pos, self.size)?;
        self.pos = self.opened()?.handle.seek(target).await?;
        Ok(self.pos)
    }

    fn pos(&self) -> Result<u64> {
        if !self.is_opened() {
            return Err(self.not_opened());
        }
        Ok(self.pos)
    }

    fn size(&self) -> Result<u64> {
        if !self.is_opened() {
            return Err(self.not_opened());
        }
        Ok(self.size)
    }

    fn eof(&self) -> Result<bool> {
        if !self.is_opened() {
            return Err(self.not_opened());
        }
        Ok(self.pos >= self.size)
    }

    fn read_paradigm(&self) -> Paradigm {
        Paradigm::Seek
    }

    fn write_paradigm(&self) -> Paradigm {
        Paradigm::Seek
    }
}

impl Drop for SftpFile {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        if let Ok(handle) = Handle::try_current() {
            let path = self.path.clone();
            let _ = handle.spawn(async move {
                let _ = state.finish(&path).await;
            });
        }
    }
}
