use thiserror::Error;

/// Error codes of SSH_FXP_STATUS replies
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    #[error("Ok")]
    Ok = 0,
    #[error("Eof")]
    Eof = 1,
    #[error("No such file")]
    NoSuchFile = 2,
    #[error("Permission denied")]
    PermissionDenied = 3,
    #[error("Failure")]
    Failure = 4,
    #[error("Bad message")]
    BadMessage = 5,
    #[error("No connection")]
    NoConnection = 6,
    #[error("Connection lost")]
    ConnectionLost = 7,
    #[error("Operation unsupported")]
    OpUnsupported = 8,
    #[error("Invalid handle")]
    InvalidHandle = 9,
    #[error("No such path")]
    NoSuchPath = 10,
    #[error("File already exists")]
    FileAlreadyExists = 11,
    #[error("Write protected")]
    WriteProtect = 12,
    #[error("No media")]
    NoMedia = 13,
    #[error("No space on filesystem")]
    NoSpaceOnFilesystem = 14,
    #[error("Quota exceeded")]
    QuotaExceeded = 15,
    #[error("Unknown principal")]
    UnknownPrincipal = 16,
    #[error("Lock conflict")]
    LockConflict = 17,
    #[error("Directory not empty")]
    DirNotEmpty = 18,
    #[error("Not a directory")]
    NotADirectory = 19,
    #[error("Invalid filename")]
    InvalidFilename = 20,
    #[error("Link loop")]
    LinkLoop = 21,
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Eof,
            2 => Self::NoSuchFile,
            3 => Self::PermissionDenied,
            5 => Self::BadMessage,
            6 => Self::NoConnection,
            7 => Self::ConnectionLost,
            8 => Self::OpUnsupported,
            9 => Self::InvalidHandle,
            10 => Self::NoSuchPath,
            11 => Self::FileAlreadyExists,
            12 => Self::WriteProtect,
            13 => Self::NoMedia,
            14 => Self::NoSpaceOnFilesystem,
            15 => Self::QuotaExceeded,
            16 => Self::UnknownPrincipal,
            17 => Self::LockConflict,
            18 => Self::DirNotEmpty,
            19 => Self::NotADirectory,
            20 => Self::InvalidFilename,
            21 => Self::LinkLoop,
            _ => Self::Failure,
        }
    }
}

#[cfg(test)]
mod test_status {
    use super::*;

    #[test]
    fn test_from_u32() {
        assert_eq!(StatusCode::from(2), StatusCode::NoSuchFile);
        assert_eq!(StatusCode::from(21), StatusCode::LinkLoop);
        assert_eq!(StatusCode::from(4), StatusCode::Failure);
        assert_eq!(StatusCode::from(1000), StatusCode::Failure);
        assert_eq!(StatusCode::QuotaExceeded as u32, 15);
    }
}
