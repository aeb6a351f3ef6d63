use std::io::SeekFrom;

use crate::{cancel::CancelChecker, error::Result, host::OpenFlags};

/// How a file allows its read or write cursor to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paradigm {
    /// Data cannot be transferred in this direction
    NoAccess,
    /// Bytes flow front to back only
    Sequential,
    /// The cursor can be moved arbitrarily
    Seek,
}

/// An open-able remote file.
///
/// A file starts closed, [`open`](File::open) moves it into read or write
/// mode and [`close`](File::close) brings it back. Every other operation
/// fails with [`Error::InvalidArgument`](crate::Error::InvalidArgument)
/// while the file is closed.
#[async_trait]
pub trait File: Send {
    fn path(&self) -> &str;

    async fn open(&mut self, flags: OpenFlags, cancel: &CancelChecker) -> Result<()>;

    fn is_opened(&self) -> bool;

    async fn close(&mut self) -> Result<()>;

    /// Reads up to `buf.len()` bytes, `0` means end of file
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Moves the cursor and returns its new absolute position
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn pos(&self) -> Result<u64>;

    fn size(&self) -> Result<u64>;

    fn eof(&self) -> Result<bool>;

    fn read_paradigm(&self) -> Paradigm;

    fn write_paradigm(&self) -> Paradigm;
}

pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };

    u64::try_from(target).map_err(|_| crate::Error::InvalidArgument("seek before start of file".to_owned()))
}

#[cfg(test)]
mod test_file {
    use super::*;

    #[test]
    fn test_resolve_seek() {
        assert_eq!(resolve_seek(SeekFrom::Start(5), 0, 10).unwrap(), 5);
        assert_eq!(resolve_seek(SeekFrom::Current(-2), 5, 10).unwrap(), 3);
        assert_eq!(resolve_seek(SeekFrom::End(-1), 0, 10).unwrap(), 9);
        assert!(resolve_seek(SeekFrom::Current(-6), 5, 10).is_err());
    }
}
