//! Keyed TTL caching and single-flight coalescing
//!
//! Backs the façade's five caches (listing, archive listing, archive
//! meta, link, extract link) on a sled-backed TTL store with an
//! in-memory LRU front, plus the content-addressed blob store used to
//! keep local copies of remote bytes for offline reads.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid content id")]
    InvalidContentId,

    #[error("corrupted content: {0}")]
    CorruptedContent(String),

    /// A fetch closure's own error, carried through untouched so a
    /// caller unwrapping a cache miss still sees the original sentinel
    /// (`ObjectNotFound`, `NotFolder`, ...) instead of a generic cache
    /// failure.
    #[error(transparent)]
    Upstream(#[from] cfk_core::CfkError),
}

pub mod blob_store;
pub mod caches;
mod lru;
pub mod policy;
pub mod single_flight;
pub mod sled_backend;
pub mod ttl_store;

pub use blob_store::{BlobStore, BlobStoreConfig, BlobWriter, ContentId};
pub use caches::CacheEngine;
pub use single_flight::SingleFlight;
