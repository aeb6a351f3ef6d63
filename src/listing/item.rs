use std::{
    fmt,
    sync::{Arc, Weak},
};

use super::Listing;
use crate::host::{EntryType, Host};

/// One entry of a shared [`Listing`]
#[derive(Clone)]
pub struct ListingItem {
    listing: Arc<Listing>,
    index: usize,
}

macro_rules! impl_fn_delegate {
    ($($name:ident -> $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&self) -> $ty {
                self.listing.$name(self.index)
            }
        )*
    };
}

impl ListingItem {
    /// # Panics
    /// When `index` is out of range.
    pub fn new(listing: Arc<Listing>, index: usize) -> Self {
        assert!(index < listing.count(), "listing index {index} out of range");
        Self { listing, index }
    }

    pub fn listing(&self) -> &Arc<Listing> {
        &self.listing
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        self.listing.host(self.index)
    }

    pub fn directory(&self) -> &str {
        self.listing.directory(self.index)
    }

    pub fn filename(&self) -> &str {
        self.listing.filename(self.index)
    }

    pub fn display_filename(&self) -> &str {
        self.listing.display_filename(self.index)
    }

    pub fn extension(&self) -> &str {
        self.listing.extension(self.index)
    }

    pub fn symlink(&self) -> &str {
        self.listing.symlink(self.index)
    }

    impl_fn_delegate!(
        path -> String,
        has_size -> bool,
        size -> u64,
        has_inode -> bool,
        inode -> u64,
        has_uid -> bool,
        uid -> u32,
        has_gid -> bool,
        gid -> u32,
        has_unix_flags -> bool,
        unix_flags -> u32,
        has_atime -> bool,
        atime -> i64,
        has_mtime -> bool,
        mtime -> i64,
        has_ctime -> bool,
        ctime -> i64,
        has_btime -> bool,
        btime -> i64,
        unix_mode -> u32,
        unix_type -> EntryType,
        is_dir -> bool,
        is_regular -> bool,
        is_symlink -> bool,
        is_dot_dot -> bool,
        is_hidden -> bool,
        has_symlink -> bool,
        has_display_filename -> bool,
    );

    pub fn downgrade(&self) -> WeakListingItem {
        WeakListingItem {
            listing: Arc::downgrade(&self.listing),
            index: self.index,
        }
    }
}

impl PartialEq for ListingItem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.listing, &other.listing) && self.index == other.index
    }
}

impl Eq for ListingItem {}

impl fmt::Debug for ListingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingItem")
            .field("path", &self.path())
            .field("index", &self.index)
            .finish()
    }
}

/// Non-owning counterpart of [`ListingItem`]
#[derive(Clone, Default)]
pub struct WeakListingItem {
    listing: Weak<Listing>,
    index: usize,
}

impl WeakListingItem {
    /// Returns the item if its listing is still alive
    pub fn upgrade(&self) -> Option<ListingItem> {
        let listing = self.listing.upgrade()?;
        (self.index < listing.count()).then(|| ListingItem {
            listing,
            index: self.index,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn refers_to(&self, item: &ListingItem) -> bool {
        self.index == item.index && std::ptr::eq(self.listing.as_ptr(), Arc::as_ptr(&item.listing))
    }
}

impl From<&ListingItem> for WeakListingItem {
    fn from(item: &ListingItem) -> Self {
        item.downgrade()
    }
}

impl fmt::Debug for WeakListingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakListingItem")
            .field("alive", &(self.listing.strong_count() > 0))
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod test_listing_item {
    use super::*;
    use crate::{
        host::S_IFREG,
        listing::{test_listing::null_host, ListingInput},
    };

    fn listing() -> Arc<Listing> {
        let mut input = ListingInput::new(null_host(), "/srv/");
        input.filenames = vec!["a.txt".into(), ".hidden".into()];
        input.unix_modes = vec![S_IFREG | 0o644; 2];
        input.unix_types = vec![EntryType::Regular; 2];
        input.sizes.insert(0, 3);
        Listing::build(input)
    }

    #[test]
    fn test_item_accessors() {
        let listing = listing();
        let item = listing.item(0);
        assert_eq!(item.path(), "/srv/a.txt");
        assert_eq!(item.size(), 3);
        assert!(item.is_regular());
        assert!(listing.item(1).is_hidden());
        assert_eq!(listing.items().count(), 2);
        assert_eq!(item, listing.item(0));
        assert_ne!(item, listing.item(1));
    }

    #[test]
    fn test_weak_item() {
        let listing = listing();
        let weak = listing.item(1).downgrade();
        assert!(weak.refers_to(&listing.item(1)));
        assert_eq!(weak.upgrade().map(|i| i.filename().to_owned()).as_deref(), Some(".hidden"));

        drop(listing);
        assert!(weak.upgrade().is_none());
        assert!(WeakListingItem::default().upgrade().is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range() {
        let _ = listing().item(2);
    }
}
