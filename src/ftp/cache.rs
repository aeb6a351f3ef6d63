use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    host::{Stat, S_IFDIR, S_IFREG},
    utils,
};

/// Cached metadata of one directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub time: i64,
    pub mode: u32,
    /// Metadata must be re-verified with the server
    pub dirty: bool,
}

impl Entry {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            size: 0,
            time: 0,
            mode: 0,
            dirty: false,
        }
    }

    pub fn to_stat(&self) -> Stat {
        Stat {
            mode: self.mode,
            size: Some(self.size),
            atime: Some(self.time),
            mtime: Some(self.time),
            ctime: Some(self.time),
            btime: Some(self.time),
            ..Default::default()
        }
    }

    fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }
}

/// Snapshot of one directory as last seen on the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub entries: Vec<Entry>,
    /// Absolute path with trailing slash
    pub path: String,
    /// Entries may be missing or superfluous
    pub dirty_structure: bool,
    /// Some entries are marked dirty
    pub has_dirty_items: bool,
}

impl Directory {
    pub fn entry_by_name(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn is_outdated(&self) -> bool {
        self.dirty_structure
    }

    fn without(&self, name: &str) -> Self {
        Self {
            entries: self.entries.iter().filter(|e| e.name != name).cloned().collect(),
            ..self.clone_header()
        }
    }

    fn clone_header(&self) -> Self {
        Self {
            entries: Vec::new(),
            path: self.path.clone(),
            dirty_structure: self.dirty_structure,
            has_dirty_items: self.has_dirty_items,
        }
    }
}

type ChangesCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Maps absolute directory paths to shared [`Directory`] snapshots.
///
/// Snapshots are never modified once published: every mutation clones the
/// affected directory and swaps the clone in under the lock. The changes
/// callback is fired after the lock is released with the affected directory
/// path (trailing slash included).
pub struct Cache {
    directories: Mutex<HashMap<String, Arc<Directory>>>,
    callback: Option<ChangesCallback>,
}

/// Parent directory (trailing slash) and filename of an absolute path
fn split(path: &str) -> Option<(String, String)> {
    utils::split_path(path).map(|(dir, name)| (dir.to_owned(), name.to_owned()))
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            directories: Mutex::new(HashMap::new()),
            callback: None,
        }
    }

    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            directories: Mutex::new(HashMap::new()),
            callback: Some(Box::new(callback)),
        }
    }

    fn inform(&self, directory: &str) {
        if let Some(callback) = &self.callback {
            callback(&utils::with_trailing_slash(directory));
        }
    }

    pub fn find_directory(&self, path: &str) -> Option<Arc<Directory>> {
        if !path.starts_with('/') {
            return None;
        }
        self.directories
            .lock()
            .get(&utils::with_trailing_slash(path))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.directories.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs a freshly downloaded listing, replacing whatever was cached
    pub fn insert_list_directory(&self, path: &str, mut directory: Directory) -> Arc<Directory> {
        trace!("Cache::insert_list_directory({path}) called");

        let path = utils::with_trailing_slash(path);
        directory.path.clone_from(&path);
        let directory = Arc::new(directory);
        let _ = self.directories.lock().insert(path, directory.clone());
        directory
    }

    /// Forces the next fetch of `path` to hit the network. Observers hear
    /// nothing until that fetch lands.
    pub fn mark_directory_dirty(&self, path: &str) {
        trace!("Cache::mark_directory_dirty({path}) called");

        let path = utils::with_trailing_slash(path);
        let mut directories = self.directories.lock();
        if let Some(dir) = directories.get_mut(&path) {
            *dir = Arc::new(Directory {
                dirty_structure: true,
                ..Directory::clone(dir)
            });
        }
    }

    pub fn make_entry_dirty(&self, path: &str) {
        trace!("Cache::make_entry_dirty({path}) called");

        let Some((dir_path, name)) = split(path) else {
            return;
        };
        {
            let mut directories = self.directories.lock();
            let Some(dir) = directories.get_mut(&dir_path) else {
                return;
            };
            if dir.entry_by_name(&name).is_none() {
                return;
            }
            let mut copy = Directory::clone(dir);
            for entry in copy.entries.iter_mut().filter(|e| e.name == name) {
                entry.dirty = true;
            }
            copy.has_dirty_items = true;
            *dir = Arc::new(copy);
        }
        self.inform(&dir_path);
    }

    /// Records a file that was just uploaded
    pub fn commit_new_file(&self, path: &str) {
        trace!("Cache::commit_new_file({path}) called");

        let Some((dir_path, name)) = split(path) else {
            return;
        };
        {
            let mut directories = self.directories.lock();
            let Some(dir) = directories.get_mut(&dir_path) else {
                return;
            };
            let mut copy = Directory::clone(dir);
            match copy.entries.iter_mut().find(|e| e.name == name) {
                Some(entry) => entry.dirty = true,
                None => copy.entries.push(Entry {
                    mode: S_IFREG,
                    dirty: true,
                    ..Entry::new(name)
                }),
            }
            copy.has_dirty_items = true;
            *dir = Arc::new(copy);
        }
        self.inform(&dir_path);
    }

    pub fn commit_mkd(&self, path: &str) {
        trace!("Cache::commit_mkd({path}) called");

        let Some((dir_path, name)) = split(path) else {
            return;
        };
        {
            let mut directories = self.directories.lock();
            if let Some(dir) = directories.get_mut(&dir_path) {
                let mut copy = Directory::clone(dir);
                copy.entries.push(Entry {
                    mode: S_IFDIR,
                    dirty: true,
                    ..Entry::new(name)
                });
                copy.has_dirty_items = true;
                *dir = Arc::new(copy);
            }
        }
        self.inform(&dir_path);
    }

    pub fn commit_rmd(&self, path: &str) {
        trace!("Cache::commit_rmd({path}) called");

        let Some((dir_path, _)) = split(path) else {
            return;
        };
        {
            let mut directories = self.directories.lock();
            Self::erase_entry(&mut directories, path);
            let _ = directories.remove(&utils::with_trailing_slash(path));
        }
        self.inform(&dir_path);
    }

    pub fn commit_unlink(&self, path: &str) {
        trace!("Cache::commit_unlink({path}) called");

        let Some((dir_path, _)) = split(path) else {
            return;
        };
        Self::erase_entry(&mut self.directories.lock(), path);
        self.inform(&dir_path);
    }

    /// Moves an entry between (possibly identical) parent directories. A
    /// cached listing of the renamed item itself moves along.
    pub fn commit_rename(&self, old_path: &str, new_path: &str) {
        trace!("Cache::commit_rename({old_path}, {new_path}) called");

        let (Some((old_dir, old_name)), Some((new_dir, new_name))) = (split(old_path), split(new_path)) else {
            return;
        };
        let same_dir = old_dir == new_dir;

        {
            let mut directories = self.directories.lock();

            let mut moved = None;
            if let Some(dir) = directories.get_mut(&old_dir) {
                let mut copy = dir.clone_header();
                for entry in &dir.entries {
                    if entry.name != old_name {
                        copy.entries.push(entry.clone());
                    } else if same_dir {
                        copy.entries.push(entry.renamed(&new_name));
                    } else {
                        moved = Some(entry.clone());
                    }
                }
                *dir = Arc::new(copy);
            }

            if let Some(entry) = moved {
                if let Some(dir) = directories.get_mut(&new_dir) {
                    let mut copy = Directory::clone(dir);
                    copy.entries.retain(|e| e.name != new_name);
                    copy.entries.push(entry.renamed(&new_name));
                    *dir = Arc::new(copy);
                }
            }

            let old_self = utils::with_trailing_slash(old_path);
            if let Some(data) = directories.remove(&old_self) {
                let new_self = utils::with_trailing_slash(new_path);
                let data = Arc::new(Directory {
                    path: new_self.clone(),
                    ..Directory::clone(&data)
                });
                let _ = directories.insert(new_self, data);
            }
        }

        self.inform(&old_dir);
        if !same_dir {
            self.inform(&new_dir);
        }
    }

    fn erase_entry(directories: &mut HashMap<String, Arc<Directory>>, path: &str) {
        let Some((dir_path, name)) = split(path) else {
            return;
        };
        if let Some(dir) = directories.get_mut(&dir_path) {
            *dir = Arc::new(dir.without(&name));
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("directories", &self.directories.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
