mod column;
mod item;
mod update;

pub use column::Column;
pub use item::{ListingItem, WeakListingItem};

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{Error, Result},
    host::{EntryType, Host},
    utils,
};

/// Raw material for [`Listing::build`]
pub struct ListingInput {
    pub title: String,
    /// Either common or dense
    pub hosts: Column<Arc<dyn Host>>,
    /// Either common or dense, each value ends with '/'
    pub directories: Column<String>,
    pub filenames: Vec<String>,
    pub display_filenames: Column<String>,
    pub sizes: Column<u64>,
    pub inodes: Column<u64>,
    pub atimes: Column<i64>,
    pub mtimes: Column<i64>,
    pub ctimes: Column<i64>,
    pub btimes: Column<i64>,
    pub unix_modes: Vec<u32>,
    pub unix_types: Vec<EntryType>,
    pub uids: Column<u32>,
    pub gids: Column<u32>,
    pub unix_flags: Column<u32>,
    pub symlinks: Column<String>,
}

impl ListingInput {
    /// Input for entries of a single directory served by `host`
    pub fn new(host: Arc<dyn Host>, directory: &str) -> Self {
        Self {
            title: String::new(),
            hosts: Column::common(host),
            directories: Column::common(utils::with_trailing_slash(directory)),
            filenames: Vec::new(),
            display_filenames: Column::sparse(),
            sizes: Column::sparse(),
            inodes: Column::sparse(),
            atimes: Column::sparse(),
            mtimes: Column::sparse(),
            ctimes: Column::sparse(),
            btimes: Column::sparse(),
            unix_modes: Vec::new(),
            unix_types: Vec::new(),
            uids: Column::sparse(),
            gids: Column::sparse(),
            unix_flags: Column::sparse(),
            symlinks: Column::sparse(),
        }
    }

    /// Input whose hosts and directories are provided per entry
    pub fn per_entry() -> Self {
        Self {
            title: String::new(),
            hosts: Column::dense(),
            directories: Column::dense(),
            filenames: Vec::new(),
            display_filenames: Column::sparse(),
            sizes: Column::sparse(),
            inodes: Column::sparse(),
            atimes: Column::sparse(),
            mtimes: Column::sparse(),
            ctimes: Column::sparse(),
            btimes: Column::sparse(),
            unix_modes: Vec::new(),
            unix_types: Vec::new(),
            uids: Column::sparse(),
            gids: Column::sparse(),
            unix_flags: Column::sparse(),
            symlinks: Column::sparse(),
        }
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// Checks the structural invariants [`Listing::build`] relies on
    pub fn validate(&self) -> Result<()> {
        let count = self.filenames.len();
        let invalid = |msg: &str| Err(Error::InvalidArgument(format!("listing input: {msg}")));

        if self.hosts.is_sparse() {
            return invalid("hosts can't be sparse");
        }
        if self.directories.is_sparse() {
            return invalid("directories can't be sparse");
        }
        if let Column::Dense(directories) = &self.directories {
            if directories.iter().any(|d| !is_valid_directory(d)) {
                return invalid("invalid directory");
            }
        }
        if let Column::Common(directory) = &self.directories {
            if !is_valid_directory(directory) {
                return invalid("invalid directory");
            }
        }
        if self.filenames.iter().any(String::is_empty) {
            return invalid("filename can't be empty");
        }
        if count > 1 {
            if self.display_filenames.is_common() {
                return invalid("display filenames can't be common");
            }
            if self.sizes.is_common() {
                return invalid("sizes can't be common");
            }
            if self.inodes.is_common() {
                return invalid("inodes can't be common");
            }
            if self.symlinks.is_common() {
                return invalid("symlinks can't be common");
            }
        }
        if self.hosts.is_dense() && self.hosts.len() != count {
            return invalid("hosts amount is inconsistent");
        }
        if self.directories.is_dense() && self.directories.len() != count {
            return invalid("directories amount is inconsistent");
        }
        if self.unix_modes.len() != count {
            return invalid("unix modes amount is inconsistent");
        }
        if self.unix_types.len() != count {
            return invalid("unix types amount is inconsistent");
        }

        Ok(())
    }

    fn compress(&mut self) {
        self.sizes.compress_contiguous();
        self.inodes.compress_contiguous();
        self.atimes.compress_contiguous();
        self.mtimes.compress_contiguous();
        self.ctimes.compress_contiguous();
        self.btimes.compress_contiguous();
        self.uids.compress_contiguous();
        self.gids.compress_contiguous();
        self.unix_flags.compress_contiguous();

        let first = match &self.hosts {
            Column::Dense(hosts) if !hosts.is_empty() && hosts.iter().all(|h| Arc::ptr_eq(h, &hosts[0])) => {
                hosts[0].clone()
            }
            _ => return,
        };
        self.hosts = Column::common(first);
    }
}

fn copy_value<T: Copy>(from: &Column<T>, index: usize, to: &mut Column<T>, at: usize) {
    if let Some(value) = from.get(index) {
        to.insert(at, *value);
    }
}

fn is_valid_directory(directory: &str) -> bool {
    !directory.is_empty() && directory.ends_with('/')
}

/// Immutable snapshot of directory entries.
///
/// Built once through [`Listing::build`] and shared through `Arc`, any update
/// produces a new listing.
pub struct Listing {
    title: String,
    count: usize,
    creation_time: i64,
    hosts: Column<Arc<dyn Host>>,
    directories: Column<String>,
    filenames: Vec<String>,
    display_filenames: Column<String>,
    sizes: Column<u64>,
    inodes: Column<u64>,
    atimes: Column<i64>,
    mtimes: Column<i64>,
    ctimes: Column<i64>,
    btimes: Column<i64>,
    unix_modes: Vec<u32>,
    unix_types: Vec<EntryType>,
    uids: Column<u32>,
    gids: Column<u32>,
    unix_flags: Column<u32>,
    symlinks: Column<String>,
}

macro_rules! impl_fn_column {
    ($has_name:ident, $get_name:ident, $column:ident, $ty:ty) => {
        pub fn $has_name(&self, index: usize) -> bool {
            self.$column.has(index)
        }

        pub fn $get_name(&self, index: usize) -> $ty {
            self.$column.get(index).copied().unwrap_or_default()
        }
    };
}

macro_rules! impl_fn_time {
    ($has_name:ident, $get_name:ident, $column:ident) => {
        pub fn $has_name(&self, index: usize) -> bool {
            self.$column.has(index)
        }

        /// Falls back to the listing creation time when unknown
        pub fn $get_name(&self, index: usize) -> i64 {
            self.$column.get(index).copied().unwrap_or(self.creation_time)
        }
    };
}

impl Listing {
    /// Builds a listing out of `input`.
    ///
    /// # Panics
    /// When `input` violates the invariants checked by [`ListingInput::validate`].
    pub fn build(mut input: ListingInput) -> Arc<Self> {
        if let Err(err) = input.validate() {
            panic!("{err}");
        }
        input.compress();

        Arc::new(Self {
            title: input.title,
            count: input.filenames.len(),
            creation_time: utils::now(),
            hosts: input.hosts,
            directories: input.directories,
            filenames: input.filenames,
            display_filenames: input.display_filenames,
            sizes: input.sizes,
            inodes: input.inodes,
            atimes: input.atimes,
            mtimes: input.mtimes,
            ctimes: input.ctimes,
            btimes: input.btimes,
            unix_modes: input.unix_modes,
            unix_types: input.unix_types,
            uids: input.uids,
            gids: input.gids,
            unix_flags: input.unix_flags,
            symlinks: input.symlinks,
        })
    }

    /// Shared listing without entries
    pub fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<Listing>> = OnceLock::new();
        EMPTY
            .get_or_init(|| Self::build(ListingInput::per_entry()))
            .clone()
    }

    /// Merges the entries picked by `indices[n]` out of `listings[n]` into a
    /// single listing with per-entry hosts and directories
    pub fn compose(listings: &[Arc<Self>], indices: &[Vec<usize>]) -> Result<Arc<Self>> {
        if listings.len() != indices.len() {
            return Err(Error::InvalidArgument(
                "compose: listings and indices have different sizes".to_owned(),
            ));
        }

        let mut input = ListingInput::per_entry();
        for (listing, picked) in listings.iter().zip(indices) {
            for &i in picked {
                if i >= listing.count() {
                    return Err(Error::InvalidArgument(format!("compose: invalid index {i}")));
                }
                listing.copy_entry_into(i, &mut input);
            }
        }

        Ok(Self::build(input))
    }

    /// Merges every entry of every listing
    pub fn compose_all(listings: &[Arc<Self>]) -> Arc<Self> {
        let mut input = ListingInput::per_entry();
        for listing in listings {
            for i in 0..listing.count() {
                listing.copy_entry_into(i, &mut input);
            }
        }
        Self::build(input)
    }

    fn copy_entry_into(&self, i: usize, input: &mut ListingInput) {
        let n = input.filenames.len();
        input.filenames.push(self.filenames[i].clone());
        input.unix_modes.push(self.unix_modes[i]);
        input.unix_types.push(self.unix_types[i]);
        input.hosts.insert(n, self.host(i).clone());
        input.directories.insert(n, self.directory(i).to_owned());

        if let Some(v) = self.display_filenames.get(i) {
            input.display_filenames.insert(n, v.clone());
        }
        if let Some(v) = self.symlinks.get(i) {
            input.symlinks.insert(n, v.clone());
        }

        copy_value(&self.sizes, i, &mut input.sizes, n);
        copy_value(&self.inodes, i, &mut input.inodes, n);
        copy_value(&self.atimes, i, &mut input.atimes, n);
        copy_value(&self.mtimes, i, &mut input.mtimes, n);
        copy_value(&self.ctimes, i, &mut input.ctimes, n);
        copy_value(&self.btimes, i, &mut input.btimes, n);
        copy_value(&self.uids, i, &mut input.uids, n);
        copy_value(&self.gids, i, &mut input.gids, n);
        copy_value(&self.unix_flags, i, &mut input.unix_flags, n);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    /// `true` if every entry comes from the same host
    pub fn has_common_host(&self) -> bool {
        self.hosts.is_common()
    }

    /// `true` if every entry lives in the same directory
    pub fn has_common_directory(&self) -> bool {
        self.directories.is_common()
    }

    pub fn host(&self, index: usize) -> &Arc<dyn Host> {
        match self.hosts.get(index) {
            Some(host) => host,
            None => panic!("listing index {index} out of range"),
        }
    }

    pub fn directory(&self, index: usize) -> &str {
        match self.directories.get(index) {
            Some(directory) => directory,
            None => panic!("listing index {index} out of range"),
        }
    }

    pub fn filename(&self, index: usize) -> &str {
        &self.filenames[index]
    }

    pub fn path(&self, index: usize) -> String {
        if self.is_dot_dot(index) {
            let directory = self.directory(index);
            return utils::split_path(directory)
                .map_or_else(|| directory.to_owned(), |(parent, _)| parent.to_owned());
        }
        utils::join(self.directory(index), self.filename(index))
    }

    pub fn has_display_filename(&self, index: usize) -> bool {
        self.display_filenames.has(index)
    }

    /// Falls back to the filename
    pub fn display_filename(&self, index: usize) -> &str {
        self.display_filenames
            .get(index)
            .map_or_else(|| self.filename(index), String::as_str)
    }

    /// `true` if the filename has an extension not counting leading and
    /// trailing dots
    pub fn has_extension(&self, index: usize) -> bool {
        !self.extension(index).is_empty()
    }

    pub fn extension(&self, index: usize) -> &str {
        let name = self.filename(index);
        match name.rfind('.') {
            Some(dot) if dot > 0 && dot + 1 < name.len() => &name[dot + 1..],
            _ => "",
        }
    }

    pub fn filename_without_extension(&self, index: usize) -> &str {
        let name = self.filename(index);
        let ext = self.extension(index);
        if ext.is_empty() {
            name
        } else {
            &name[..name.len() - ext.len() - 1]
        }
    }

    impl_fn_column!(has_size, size, sizes, u64);
    impl_fn_column!(has_inode, inode, inodes, u64);
    impl_fn_column!(has_uid, uid, uids, u32);
    impl_fn_column!(has_gid, gid, gids, u32);
    impl_fn_column!(has_unix_flags, unix_flags, unix_flags, u32);
    impl_fn_time!(has_atime, atime, atimes);
    impl_fn_time!(has_mtime, mtime, mtimes);
    impl_fn_time!(has_ctime, ctime, ctimes);
    impl_fn_time!(has_btime, btime, btimes);

    pub fn unix_mode(&self, index: usize) -> u32 {
        self.unix_modes[index]
    }

    pub fn unix_type(&self, index: usize) -> EntryType {
        self.unix_types[index]
    }

    pub fn is_dir(&self, index: usize) -> bool {
        EntryType::from_mode(self.unix_mode(index)) == EntryType::Directory
    }

    pub fn is_regular(&self, index: usize) -> bool {
        EntryType::from_mode(self.unix_mode(index)) == EntryType::Regular
    }

    /// The entry itself is a symlink, its mode may describe the target
    pub fn is_symlink(&self, index: usize) -> bool {
        self.unix_type(index) == EntryType::Symlink
    }

    pub fn is_dot_dot(&self, index: usize) -> bool {
        self.filename(index) == ".."
    }

    pub fn is_hidden(&self, index: usize) -> bool {
        !self.is_dot_dot(index) && self.filename(index).starts_with('.')
    }

    pub fn has_symlink(&self, index: usize) -> bool {
        self.symlinks.has(index)
    }

    pub fn symlink(&self, index: usize) -> &str {
        self.symlinks.get(index).map_or("", String::as_str)
    }

    pub fn item(self: &Arc<Self>, index: usize) -> ListingItem {
        ListingItem::new(self.clone(), index)
    }

    pub fn items(self: &Arc<Self>) -> impl Iterator<Item = ListingItem> + '_ {
        (0..self.count).map(move |i| self.item(i))
    }
}

impl fmt::Debug for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listing")
            .field("title", &self.title)
            .field("count", &self.count)
            .field("directories", &self.directories)
            .field("filenames", &self.filenames)
            .finish_non_exhaustive()
    }
}
