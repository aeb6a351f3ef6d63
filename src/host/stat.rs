use serde::{Deserialize, Serialize};

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFIFO: u32 = 0o010_000;
pub const S_IFCHR: u32 = 0o020_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFBLK: u32 = 0o060_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFLNK: u32 = 0o120_000;
pub const S_IFSOCK: u32 = 0o140_000;

/// Unix file type taken from the `S_IFMT` bits of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntryType {
    #[default]
    Unknown,
    Fifo,
    Character,
    Directory,
    Block,
    Regular,
    Symlink,
    Socket,
}

impl EntryType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFIFO => Self::Fifo,
            S_IFCHR => Self::Character,
            S_IFDIR => Self::Directory,
            S_IFBLK => Self::Block,
            S_IFREG => Self::Regular,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Fifo => S_IFIFO,
            Self::Character => S_IFCHR,
            Self::Directory => S_IFDIR,
            Self::Block => S_IFBLK,
            Self::Regular => S_IFREG,
            Self::Symlink => S_IFLNK,
            Self::Socket => S_IFSOCK,
        }
    }
}

/// Metadata of a single filesystem object.
///
/// Every field except `mode` may be unknown to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub size: Option<u64>,
    pub inode: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub flags: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
    pub btime: Option<i64>,
}

impl Stat {
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.entry_type() == EntryType::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type() == EntryType::Symlink
    }

    pub fn len(&self) -> u64 {
        self.size.unwrap_or(0)
    }
}

/// Volume statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatFs {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub avail_bytes: u64,
    pub volume_name: String,
}

/// Entry produced by [`Host::iterate_directory_listing`](super::Host::iterate_directory_listing)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub name: String,
    pub gecos: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub gid: u32,
    pub name: String,
    pub gecos: String,
}
