use std::{fmt, io};
use thiserror::Error;

use crate::sftp::StatusCode;

/// Stage of connection establishment at which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    Resolve,
    Connect,
    Handshake,
    Authentication,
    /// Private key could not be read or decoded
    KeyFile,
    Subsystem,
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Authentication => "authentication",
            Self::KeyFile => "key file",
            Self::Subsystem => "subsystem",
        })
    }
}

/// Protocol whose server reported a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolDomain {
    Ftp,
    Sftp,
}

impl fmt::Display for ProtocolDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ftp => "FTP",
            Self::Sftp => "SFTP",
        })
    }
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NotSupported,
    Cancelled,
    Connection,
    Protocol,
    IO,
}

/// Enum for all errors produced by hosts, files and listings
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The caller broke the contract of the call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No such file or directory: {0}")]
    NotFound(String),
    /// The backend has no way to perform the operation
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Connection failed at {stage}: {message}")]
    Connection {
        stage: ConnectionStage,
        message: String,
    },
    /// The server refused the request with its own status code
    #[error("{domain} error {code}: {message}")]
    Protocol {
        domain: ProtocolDomain,
        code: u32,
        message: String,
    },
    #[error("Unexpected EOF on stream")]
    UnexpectedEof,
    #[error("I/O: {0}")]
    IO(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::UnexpectedEof | Self::IO(_) => ErrorKind::IO,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn connection<M: ToString>(stage: ConnectionStage, message: M) -> Self {
        Self::Connection {
            stage,
            message: message.to_string(),
        }
    }

    pub(crate) fn ftp<M: Into<String>>(code: u32, message: M) -> Self {
        Self::Protocol {
            domain: ProtocolDomain::Ftp,
            code,
            message: message.into(),
        }
    }

    /// Status code of an SFTP protocol error, if this is one
    pub fn sftp_status(&self) -> Option<StatusCode> {
        match self {
            Self::Protocol {
                domain: ProtocolDomain::Sftp,
                code,
                ..
            } => Some(StatusCode::from(*code)),
            _ => None,
        }
    }

    /// Maps an SFTP status to the taxonomy. `message` is what the server
    /// said about it, or the object the request addressed.
    pub(crate) fn sftp<M: Into<String>>(status: StatusCode, message: M) -> Self {
        match status {
            StatusCode::NoSuchFile | StatusCode::NoSuchPath => Self::NotFound(message.into()),
            StatusCode::OpUnsupported => Self::NotSupported(message.into()),
            _ => Self::Protocol {
                domain: ProtocolDomain::Sftp,
                code: status as u32,
                message: message.into(),
            },
        }
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::sftp(status, status.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            io::ErrorKind::Unsupported => Self::NotSupported(err.to_string()),
            io::ErrorKind::InvalidInput => Self::InvalidArgument(err.to_string()),
            _ => Self::IO(err.to_string()),
        }
    }
}

#[cfg(test)]
mod test_error {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, Error::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::IO);

        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_sftp_status_round_trip() {
        let err = Error::from(StatusCode::PermissionDenied);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.sftp_status(), Some(StatusCode::PermissionDenied));
        assert_eq!(Error::ftp(550, "nope").sftp_status(), None);

        assert!(Error::from(StatusCode::NoSuchFile).is_not_found());
        assert_eq!(Error::from(StatusCode::OpUnsupported).kind(), ErrorKind::NotSupported);
        assert_eq!(Error::from(StatusCode::from(77)).sftp_status(), Some(StatusCode::Failure));
    }

    #[test]
    fn test_display() {
        let err = Error::connection(ConnectionStage::Authentication, "rejected");
        assert_eq!(err.to_string(), "Connection failed at authentication: rejected");
    }
}
