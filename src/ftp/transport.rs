use tokio::io::{AsyncRead, AsyncWrite};

use super::FtpConfig;
use crate::{
    cancel::CancelChecker,
    error::{ConnectionStage, Error, Result},
};

/// Download side of a data connection
pub type DataReader = Box<dyn AsyncRead + Send + Unpin>;

/// Upload side of a data connection
pub type DataWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A reply on the control connection. Multi-line replies are joined with
/// `'\n'` and carry the code of their last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u32,
    pub text: String,
}

impl Reply {
    pub fn new<S: Into<String>>(code: u32, text: S) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// 1xx
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Turns a negative reply into an error. `path` is the path the command
    /// addressed, a 550 for it becomes [`Error::NotFound`].
    pub fn check(self, path: Option<&str>) -> Result<Self> {
        match self.code {
            100..=399 => Ok(self),
            421 => Err(Error::connection(ConnectionStage::Connect, self.text)),
            530 | 532 => Err(Error::connection(ConnectionStage::Authentication, self.text)),
            550 => match path {
                Some(path) => Err(Error::NotFound(path.to_owned())),
                None => Err(Error::ftp(self.code, self.text)),
            },
            code => Err(Error::ftp(code, self.text)),
        }
    }
}

/// Opens authenticated control connections
#[async_trait]
pub trait FtpConnector: Send + Sync {
    async fn connect(&self, config: &FtpConfig) -> Result<Box<dyn FtpSession>>;
}

/// One logged-in control connection plus at most one data connection in
/// flight.
///
/// Paths passed in are absolute and unescaped. A transfer started with
/// [`retrieve`](FtpSession::retrieve) or [`store`](FtpSession::store) stays
/// pending until [`finish_transfer`](FtpSession::finish_transfer) or
/// [`abort`](FtpSession::abort); a session with a pending transfer settles
/// it on its own before running the next command.
#[async_trait]
pub trait FtpSession: Send {
    /// Directory the control connection was last moved into
    fn working_dir(&self) -> Option<&str>;

    async fn change_dir(&mut self, dir: &str) -> Result<()>;

    /// Runs `LIST` inside `dir` and returns the raw listing text
    async fn list(&mut self, dir: &str, cancel: &CancelChecker) -> Result<Vec<u8>>;

    /// Sends a single command and returns the server's final reply without
    /// interpreting it
    async fn command(&mut self, command: &str) -> Result<Reply>;

    /// Starts a download of `path` at byte `offset`
    async fn retrieve(&mut self, path: &str, offset: u64) -> Result<DataReader>;

    /// Starts an upload to `path`
    async fn store(&mut self, path: &str, append: bool) -> Result<DataWriter>;

    /// Waits for the completion reply of the pending transfer. The data
    /// stream must be dropped or shut down first.
    async fn finish_transfer(&mut self) -> Result<()>;

    /// Aborts the pending transfer, a no-op when none is pending
    async fn abort(&mut self) -> Result<()>;

    /// Brings the session back to its default options before it is pooled
    fn reset(&mut self);

    fn is_alive(&self) -> bool;
}

#[cfg(test)]
mod test_transport {
    use super::*;

    #[test]
    fn test_reply_check() {
        assert!(Reply::new(226, "done").check(None).is_ok());
        assert!(Reply::new(350, "pending").check(None).unwrap().is_intermediate());

        let err = Reply::new(550, "no").check(Some("/a")).unwrap_err();
        assert!(err.is_not_found());
        let err = Reply::new(550, "no").check(None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);

        let err = Reply::new(530, "login incorrect").check(None).unwrap_err();
        assert!(matches!(
            err,
            Error::Connection {
                stage: ConnectionStage::Authentication,
                ..
            }
        ));
        let err = Reply::new(421, "bye").check(None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }
}
