//! Czech File Knife Core
//!
//! Core traits, types, and abstractions for the unified filesystem interface.

pub mod archive;
pub mod backend;
pub mod entry;
pub mod error;
pub mod link;
pub mod metadata;
pub mod operations;
pub mod path;

pub use archive::{ArchiveEntry, ArchiveMeta, MultipartInfo};
pub use backend::{ByteStream, MutationResult, SpaceInfo, StorageBackend, StorageCapabilities, StorageConfig};
pub use entry::{CharMap, DirectoryListing, Entry, EntryKind};
pub use error::{CfkError, CfkResult};
pub use link::{Link, LinkGuard, LinkKind};
pub use metadata::Metadata;
pub use path::VirtualPath;
