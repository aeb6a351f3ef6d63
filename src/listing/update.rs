use std::sync::Arc;

use super::{Listing, ListingInput};
use crate::{cancel::CancelChecker, host::StatFlags};

impl Listing {
    /// Re-stats every entry against its host and rebuilds the listing
    /// without the entries that can no longer be stat'ed.
    ///
    /// Returns `None` if `cancel` fires at any point.
    pub async fn produce_updated_temporary_panel_listing(
        original: &Listing,
        cancel: &CancelChecker,
    ) -> Option<Arc<Listing>> {
        let mut input = ListingInput::per_entry();
        input.title = original.title().to_owned();

        for i in 0..original.count() {
            if cancel.is_cancelled() {
                return None;
            }

            let flags = if original.is_symlink(i) {
                StatFlags::NO_FOLLOW
            } else {
                StatFlags::empty()
            };

            let path = original.path(i);
            let stat = match original.host(i).stat(&path, flags, cancel).await {
                Ok(stat) => stat,
                Err(err) => {
                    trace!("dropping {path} from the temporary listing: {err}");
                    continue;
                }
            };

            let n = input.filenames.len();
            input.filenames.push(original.filename(i).to_owned());
            input.unix_modes.push(original.unix_mode(i));
            input.unix_types.push(original.unix_type(i));
            input.hosts.insert(n, original.host(i).clone());
            input.directories.insert(n, original.directory(i).to_owned());

            if let Some(size) = stat.size {
                input.sizes.insert(n, size);
            }
            if let Some(inode) = stat.inode {
                input.inodes.insert(n, inode);
            }
            if let Some(atime) = stat.atime {
                input.atimes.insert(n, atime);
            }
            if let Some(mtime) = stat.mtime {
                input.mtimes.insert(n, mtime);
            }
            if let Some(ctime) = stat.ctime {
                input.ctimes.insert(n, ctime);
            }
            if let Some(btime) = stat.btime {
                input.btimes.insert(n, btime);
            }
            if let Some(uid) = stat.uid {
                input.uids.insert(n, uid);
            }
            if let Some(gid) = stat.gid {
                input.gids.insert(n, gid);
            }
            if let Some(flags) = stat.flags {
                input.unix_flags.insert(n, flags);
            }
            if original.has_symlink(i) {
                input.symlinks.insert(n, original.symlink(i).to_owned());
            }
            if original.has_display_filename(i) {
                input.display_filenames.insert(n, original.display_filename(i).to_owned());
            }
        }

        if cancel.is_cancelled() {
            return None;
        }

        Some(Listing::build(input))
    }
}
