//! Storage backend capability interface

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::{
    archive::ArchiveMeta,
    entry::{DirectoryListing, Entry},
    error::{CfkError, CfkResult},
    link::Link,
    operations::*,
    VirtualPath,
};

/// Byte stream type
pub type ByteStream = Pin<Box<dyn Stream<Item = CfkResult<Bytes>> + Send>>;

/// Storage backend capabilities, probed once after `init` and consulted
/// by the façade before attempting an optional operation so that a
/// caller gets a clean `NotSupport` instead of a round trip to the
/// backend.
#[derive(Debug, Clone, Default)]
pub struct StorageCapabilities {
    pub get: bool,
    pub make_dir: bool,
    pub move_: bool,
    pub copy: bool,
    pub rename: bool,
    pub remove: bool,
    pub put: bool,
    pub put_url: bool,
    pub archive_reader: bool,
    pub archive_decompress: bool,
    pub reference: bool,
}

impl StorageCapabilities {
    pub fn full() -> Self {
        Self {
            get: true, make_dir: true, move_: true, copy: true, rename: true, remove: true,
            put: true, put_url: true, archive_reader: true, archive_decompress: true, reference: true,
        }
    }

    pub fn read_only() -> Self {
        Self { get: true, ..Default::default() }
    }

    pub fn local_filesystem() -> Self {
        Self {
            get: true, make_dir: true, move_: true, copy: true, rename: true,
            remove: true, put: true, ..Default::default()
        }
    }
}

/// Per-mount configuration flags a backend declares; the façade reads
/// these to decide cross-cutting behavior (proxying, caching,
/// overwrite policy) without needing backend-specific code.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// The backend sorts its own listings; the façade skips re-sorting.
    pub local_sort: bool,
    /// Never cache listings/metadata for this mount.
    pub no_cache: bool,
    /// Uploads are never supported regardless of the `put` capability
    /// flag (e.g. a read-only mirror mount).
    pub no_upload: bool,
    /// Reads must always be proxied through the façade, never linked
    /// out directly (e.g. to enforce auth on every byte served).
    pub only_proxy: bool,
    /// Only single-file links are ever handed out, never directory
    /// bundles.
    pub only_link_m_file: bool,
    /// The backend's links are never bare URLs (always Direct/RangeRead).
    pub no_link_url: bool,
    /// Uploading over an existing object is rejected rather than
    /// silently overwritten.
    pub no_overwrite_upload: bool,
    /// Proxied reads should honor HTTP Range semantics.
    pub proxy_range_option: bool,
    /// The façade should actively probe availability before serving
    /// requests against this mount.
    pub check_status: bool,
    pub default_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_sort: false,
            no_cache: false,
            no_upload: false,
            only_proxy: false,
            only_link_m_file: false,
            no_link_url: false,
            no_overwrite_upload: false,
            proxy_range_option: false,
            check_status: false,
            default_root: "/".to_string(),
        }
    }
}

/// Space information
#[derive(Debug, Clone, Default)]
pub struct SpaceInfo {
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub available: Option<u64>,
}

impl SpaceInfo {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Result of a mutating operation: the backend's post-state view of the
/// affected object, when it's cheap for the backend to report one. The
/// cache layer patches its entry from `Some`, and invalidates on `None`
/// (unless the mount's listing is marked lazy-cache).
#[derive(Debug, Clone)]
pub enum MutationResult {
    Entry(Entry),
    Unknown,
}

/// Storage backend trait: the capability interface every mounted
/// backend implements. `init`/`shutdown`, `storage_config`/`addition`,
/// `list`, and `link` are mandatory; everything else defaults to
/// `Err(NotSupport)` so a backend only needs to override what it
/// actually supports.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &StorageCapabilities;
    fn storage_config(&self) -> &StorageConfig;
    /// Backend-specific configuration blob, opaque to the façade.
    fn addition(&self) -> &Value;

    /// Called once when the backend is enabled. Implementations that
    /// panic here are caught by the registry and recorded as a disabled
    /// status rather than taking the process down.
    async fn init(&self) -> CfkResult<()>;

    /// Called when the backend is disabled or removed, to release any
    /// held resources (connections, file handles, tokens).
    async fn shutdown(&self) -> CfkResult<()> {
        Ok(())
    }

    async fn list(&self, path: &VirtualPath, options: &ListOptions) -> CfkResult<DirectoryListing>;

    /// Produce a `Link` usable to read `path`'s contents.
    async fn link(&self, path: &VirtualPath, options: &ReadOptions) -> CfkResult<Link>;

    async fn get_space_info(&self) -> CfkResult<SpaceInfo> {
        Ok(SpaceInfo::unknown())
    }

    // --- optional operations -------------------------------------------------

    async fn get(&self, _path: &VirtualPath) -> CfkResult<Entry> {
        Err(CfkError::NotSupport("get".into()))
    }

    async fn get_root(&self) -> CfkResult<Entry> {
        Err(CfkError::NotSupport("get_root".into()))
    }

    async fn make_dir(&self, _path: &VirtualPath) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("make_dir".into()))
    }

    /// Native move within this backend. Cross-backend moves are never
    /// routed here; the façade rejects them before calling in.
    async fn move_object(&self, _source: &VirtualPath, _dest: &VirtualPath, _options: &MoveOptions) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("move".into()))
    }

    async fn copy(&self, _source: &VirtualPath, _dest: &VirtualPath, _options: &CopyOptions) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("copy".into()))
    }

    async fn rename(&self, _source: &VirtualPath, _new_name: &str) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("rename".into()))
    }

    async fn remove(&self, _path: &VirtualPath, _options: &DeleteOptions) -> CfkResult<()> {
        Err(CfkError::NotSupport("remove".into()))
    }

    async fn put(&self, _path: &VirtualPath, _stream: ByteStream, _size_hint: Option<u64>, _options: &WriteOptions) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("put".into()))
    }

    /// Upload by handing the backend a fetchable URL rather than
    /// streaming bytes through the façade (e.g. "import from URL").
    async fn put_url(&self, _path: &VirtualPath, _url: &str, _headers: std::collections::HashMap<String, String>) -> CfkResult<MutationResult> {
        Err(CfkError::NotSupport("put_url".into()))
    }

    /// Escape hatch for backend-specific operations that don't map onto
    /// the common surface (e.g. "empty trash", "generate share link").
    async fn other(&self, _method: &str, _args: Value) -> CfkResult<Value> {
        Err(CfkError::NotSupport("other".into()))
    }

    async fn archive_meta(&self, _path: &VirtualPath) -> CfkResult<ArchiveMeta> {
        Err(CfkError::DriverExtractNotSupported(self.id().to_string()))
    }

    async fn archive_list(&self, _path: &VirtualPath, _inner_path: &VirtualPath) -> CfkResult<DirectoryListing> {
        Err(CfkError::DriverExtractNotSupported(self.id().to_string()))
    }

    async fn archive_decompress(&self, _path: &VirtualPath, _inner_path: &VirtualPath, _dest: &VirtualPath) -> CfkResult<()> {
        Err(CfkError::DriverExtractNotSupported(self.id().to_string()))
    }

    /// Resolve to another mount's `VirtualPath`, for backends that are
    /// pure aliases (reference drivers) over another mounted storage.
    async fn reference(&self) -> CfkResult<Option<String>> {
        Ok(None)
    }
}
