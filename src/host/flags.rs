use serde::{Deserialize, Serialize};

/// Optional capabilities advertised by a host
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Features(u32);

/// Modifiers for [`Host::stat`](super::Host::stat)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatFlags(u32);

/// Modifiers for [`Host::fetch_directory_listing`](super::Host::fetch_directory_listing)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchFlags(u32);

/// Mode and permission bits for [`File::open`](crate::file::File::open)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

bitflags! {
    impl Features: u32 {
        const FETCH_USERS = 1 << 0;
        const FETCH_GROUPS = 1 << 1;
        const SET_PERMISSIONS = 1 << 2;
        const SET_FLAGS = 1 << 3;
        const SET_OWNERSHIP = 1 << 4;
        const SET_TIMES = 1 << 5;
        const NON_EMPTY_RMDIR = 1 << 6;
    }

    impl StatFlags: u32 {
        /// Do not resolve a trailing symlink
        const NO_FOLLOW = 1 << 0;
        /// Bypass any cached metadata
        const FORCE_REFRESH = 1 << 1;
    }

    impl FetchFlags: u32 {
        /// Do not synthesize a ".." entry
        const NO_DOT_DOT = 1 << 0;
        const FORCE_REFRESH = 1 << 1;
    }

    impl OpenFlags: u32 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const APPEND = 0x0004;
        const CREATE = 0x0008;
        /// Fail if the file already exists
        const NO_EXIST = 0x0010;
        const TRUNCATE = 0x0020;

        const IRUSR = 0o400 << 16;
        const IWUSR = 0o200 << 16;
        const IXUSR = 0o100 << 16;
        const IRGRP = 0o040 << 16;
        const IWGRP = 0o020 << 16;
        const IXGRP = 0o010 << 16;
        const IROTH = 0o004 << 16;
        const IWOTH = 0o002 << 16;
        const IXOTH = 0o001 << 16;
    }
}

impl OpenFlags {
    /// Permission bits requested for a newly created file
    pub fn mode(self) -> u32 {
        (self.bits() >> 16) & 0o777
    }
}
