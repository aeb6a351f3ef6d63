use crate::host::{EntryType, Stat, S_IFMT};

/// Presence bits of SFTP file attributes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrFlags(u32);

bitflags! {
    impl AttrFlags: u32 {
        const SIZE = 0x0000_0001;
        const UIDGID = 0x0000_0002;
        const PERMISSIONS = 0x0000_0004;
        const ACMODTIME = 0x0000_0008;
        const EXTENDED = 0x8000_0000;
    }
}

/// Attributes of a remote object as reported by the server.
///
/// A field is `None` when the server did not send it. On the wire uid and gid
/// as well as atime and mtime travel in pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

impl Attributes {
    pub fn flags(&self) -> AttrFlags {
        let mut flags = AttrFlags::empty();
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() || self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() || self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        flags
    }

    pub fn has(&self, flags: AttrFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn with_permissions(mode: u32) -> Self {
        Self {
            permissions: Some(mode),
            ..Default::default()
        }
    }

    pub fn with_ownership(uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: Some(gid),
            ..Default::default()
        }
    }

    pub fn with_times(atime: u32, mtime: u32) -> Self {
        Self {
            atime: Some(atime),
            mtime: Some(mtime),
            ..Default::default()
        }
    }

    pub fn entry_type(&self) -> EntryType {
        self.permissions.map_or(EntryType::Unknown, EntryType::from_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type() == EntryType::Symlink
    }

    /// Mode bits with the file type only
    pub fn file_type_bits(&self) -> u32 {
        self.permissions.unwrap_or(0) & S_IFMT
    }

    /// Metadata in host terms. SFTP v3 has no creation or change time, both
    /// mirror the modification time.
    pub fn to_stat(&self) -> Stat {
        let mtime = self.mtime.map(i64::from);
        Stat {
            mode: self.permissions.unwrap_or(0),
            size: self.size,
            uid: self.uid,
            gid: self.gid,
            atime: self.atime.map(i64::from),
            mtime,
            ctime: mtime,
            btime: mtime,
            ..Default::default()
        }
    }
}

/// Converts a host timestamp to the 32-bit SFTP v3 representation
pub(crate) fn wire_time(time: i64) -> u32 {
    u32::try_from(time.max(0)).unwrap_or(u32::MAX)
}
