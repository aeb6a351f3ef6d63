#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate async_trait;

/// Cooperative cancellation of long-running operations
pub mod cancel;
mod error;
pub mod file;
/// FTP backend with a directory cache
pub mod ftp;
pub mod host;
/// Immutable directory snapshots
pub mod listing;
/// SFTP backend with pooled SSH sessions
pub mod sftp;
pub mod utils;

pub use cancel::CancelChecker;
pub use error::{ConnectionStage, Error, ErrorKind, ProtocolDomain, Result};
pub use file::{File, Paradigm};
pub use host::{Host, HostConfiguration};
pub use listing::{Listing, ListingInput, ListingItem};
