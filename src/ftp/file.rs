use bytes::{Buf, BytesMut};
use std::{io::SeekFrom, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    runtime::Handle,
};

use super::{
    host::{FtpHost, IoLease},
    transport::{DataReader, DataWriter},
};
use crate::{
    cancel::CancelChecker,
    error::{Error, Result},
    file::{self, File, Paradigm},
    host::{Host, OpenFlags, StatFlags},
    utils,
};

const READ_CHUNK: usize = 32 * 1024;

struct ReadState {
    lease: IoLease,
    stream: Option<DataReader>,
    /// Downloaded bytes starting at `buf_offset`
    buf: BytesMut,
    buf_offset: u64,
}

struct WriteState {
    lease: IoLease,
    writer: BufWriter<DataWriter>,
}

enum Mode {
    Closed,
    Read(ReadState),
    Write(WriteState),
}

impl ReadState {
    fn new(lease: IoLease) -> Self {
        Self {
            lease,
            stream: None,
            buf: BytesMut::new(),
            buf_offset: 0,
        }
    }

    /// Makes `len` bytes at `offset` available in the buffer, restarting the
    /// download if `offset` is not reachable from the current one. With `out`
    /// the bytes are moved out of the buffer.
    async fn read_chunk(
        &mut self,
        path: &str,
        out: Option<&mut [u8]>,
        len: usize,
        offset: u64,
        cancel: &CancelChecker,
    ) -> Result<usize> {
        trace!("FtpFile::read_chunk({len}, {offset}) called");

        let end = offset + len as u64;
        let buffered_end = self.buf_offset + self.buf.len() as u64;

        if offset < self.buf_offset || end > buffered_end {
            if offset < self.buf_offset || offset > buffered_end || self.stream.is_none() {
                self.stream = None;
                self.buf.clear();
                self.buf_offset = offset;

                let session = self.lease.session()?;
                self.stream = Some(session.retrieve(path, offset).await?);
            }

            let mut chunk = vec![0; READ_CHUNK];
            while self.buf_offset + (self.buf.len() as u64) < end {
                cancel.check()?;
                let Some(stream) = self.stream.as_mut() else {
                    break;
                };
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    self.stream = None;
                    self.lease.session()?.finish_transfer().await?;
                    break;
                }
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        if self.buf_offset < offset {
            let skip = usize::try_from(offset - self.buf_offset).unwrap_or(usize::MAX);
            let discard = self.buf.len().min(skip);
            self.buf.advance(discard);
            self.buf_offset += discard as u64;
        }

        let available = if self.buf_offset == offset { self.buf.len() } else { 0 };
        let size = len.min(available);

        if let Some(out) = out {
            out[..size].copy_from_slice(&self.buf[..size]);
            self.buf.advance(size);
            self.buf_offset += size as u64;
        }

        Ok(size)
    }
}

impl Mode {
    /// Completes whatever transfer is in flight and releases the connection
    async fn finish(self, path: &str) -> Result<()> {
        match self {
            Self::Closed => Ok(()),
            Self::Read(mut state) => {
                state.stream = None;
                let session = state.lease.session()?;
                if let Err(err) = session.abort().await {
                    debug!("aborting download of {path} failed: {err}");
                }
                Ok(())
            }
            Self::Write(state) => {
                let WriteState { mut lease, mut writer } = state;

                let mut result = writer.flush().await.map_err(Error::from);
                if result.is_ok() {
                    result = writer.shutdown().await.map_err(Error::from);
                }
                drop(writer);
                if result.is_ok() {
                    result = lease.session()?.finish_transfer().await;
                }

                lease.host().cache().commit_new_file(path);
                result
            }
        }
    }
}

/// File on an FTP server.
///
/// Reading downloads ahead of the cursor and restarts the download with an
/// offset when the cursor jumps. Writing uploads sequentially.
pub struct FtpFile {
    path: String,
    host: Arc<FtpHost>,
    mode: Mode,
    pos: u64,
    size: u64,
}

impl FtpFile {
    pub(crate) fn new(path: &str, host: Arc<FtpHost>) -> Self {
        trace!("FtpFile::new({path}) called");
        Self {
            path: path.to_owned(),
            host,
            mode: Mode::Closed,
            pos: 0,
            size: 0,
        }
    }

    fn dir_name(&self) -> String {
        utils::split_path(&self.path).map_or_else(|| "/".to_owned(), |(dir, _)| dir.to_owned())
    }

    fn not_opened(&self) -> Error {
        Error::InvalidArgument(format!("{} is not opened", self.path))
    }

    async fn open_for_reading(&mut self, size: u64, cancel: &CancelChecker) -> Result<()> {
        let lease = self.host.io_session_at(&self.dir_name()).await?;
        let mut state = ReadState::new(lease);
        self.size = size;
        self.pos = 0;

        if size > 0 {
            let primed = state.read_chunk(&self.path, None, 1, 0, cancel).await?;
            if primed != 1 {
                return Err(Error::IO(format!("download of {} did not start", self.path)));
            }
        }

        self.mode = Mode::Read(state);
        Ok(())
    }

    async fn open_for_writing(&mut self, append: bool, existing_size: Option<u64>) -> Result<()> {
        let mut lease = self.host.io_session_at(&self.dir_name()).await?;
        let writer = lease.session()?.store(&self.path, append).await?;

        let start = if append { existing_size.unwrap_or(0) } else { 0 };
        self.pos = start;
        self.size = start;
        self.mode = Mode::Write(WriteState {
            lease,
            writer: BufWriter::new(writer),
        });
        Ok(())
    }
}

#[async_trait]
impl File for FtpFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn open(&mut self, flags: OpenFlags, cancel: &CancelChecker) -> Result<()> {
        trace!("FtpFile::open({}, {flags:?}) called", self.path);
        if self.is_opened() {
            return Err(Error::InvalidArgument(format!("{} is already opened", self.path)));
        }

        let stat = self.host.stat(&self.path, StatFlags::empty(), cancel).await;
        let reading = flags.contains(OpenFlags::READ);
        let writing = flags.contains(OpenFlags::WRITE);

        if reading && !writing {
            let stat = stat?;
            if !stat.is_regular() {
                return Err(Error::InvalidArgument(format!("{} is not a regular file", self.path)));
            }
            return self.open_for_reading(stat.len(), cancel).await;
        }

        if writing && !reading {
            if flags.contains(OpenFlags::NO_EXIST) && stat.is_ok() {
                return Err(Error::InvalidArgument(format!("{} already exists", self.path)));
            }
            let existing = stat.ok().map(|stat| stat.len());
            return self
                .open_for_writing(flags.contains(OpenFlags::APPEND), existing)
                .await;
        }

        Err(Error::NotSupported(format!("{flags:?} on an FTP file")))
    }

    fn is_opened(&self) -> bool {
        !matches!(self.mode, Mode::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        trace!("FtpFile::close({}) called", self.path);
        let mode = std::mem::replace(&mut self.mode, Mode::Closed);
        self.pos = 0;
        self.size = 0;
        mode.finish(&self.path).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Mode::Read(state) = &mut self.mode else {
            return Err(self.not_opened());
        };
        if self.pos >= self.size {
            return Ok(0);
        }

        let len = buf.len();
        let read = state
            .read_chunk(&self.path, Some(buf), len, self.pos, &CancelChecker::none())
            .await?;
        self.pos += read as u64;
        Ok(read)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Mode::Write(state) = &mut self.mode else {
            return Err(self.not_opened());
        };

        state.writer.write_all(buf).await?;
        self.pos += buf.len() as u64;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !matches!(self.mode, Mode::Read(_)) {
            return Err(Error::InvalidArgument(format!("{} is not opened for reading", self.path)));
        }

        let target = file::resolve_seek(pos, self.pos, self.size)?;
        self.pos = target.min(self.size);
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
        Paradigm::Sequential
    }
}

impl Drop for FtpFile {
    fn drop(&mut self) {
        let mode = std::mem::replace(&mut self.mode, Mode::Closed);
        if matches!(mode, Mode::Closed) {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let path = self.path.clone();
                let _ = handle.spawn(async move {
                    if let Err(err) = mode.finish(&path).await {
                        warn!("closing {path} failed: {err}");
                    }
                });
            }
            Err(_) => {
                warn!("{} dropped outside of a runtime, transfer left unfinished", self.path);
                if let Mode::Write(state) = &mode {
                    state.lease.host().cache().commit_new_file(&self.path);
                }
            }
        }
    }
}
