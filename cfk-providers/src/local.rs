//! Local filesystem backend: the reference `StorageBackend`
//! implementation, mounted at a real directory on disk.

use async_trait::async_trait;
use cfk_core::archive::ArchiveMeta;
use cfk_core::backend::{ByteStream, MutationResult, SpaceInfo, StorageBackend, StorageCapabilities, StorageConfig};
use cfk_core::entry::{DirectoryListing, Entry, EntryKind};
use cfk_core::error::{CfkError, CfkResult};
use cfk_core::link::Link;
use cfk_core::metadata::{Metadata, Permissions};
use cfk_core::operations::*;
use cfk_core::VirtualPath;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Mounts a real directory tree as a backend. Paths are mapped by
/// simply joining a `VirtualPath`'s segments onto `root` — the
/// resolver has already stripped the mount prefix before calling in.
pub struct LocalBackend {
    id: String,
    root: PathBuf,
    capabilities: StorageCapabilities,
    config: StorageConfig,
    addition: Value,
}

impl LocalBackend {
    pub fn new(id: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            root: root.as_ref().to_path_buf(),
            capabilities: StorageCapabilities::local_filesystem(),
            config: StorageConfig::default(),
            addition: Value::Null,
        }
    }

    fn real_path(&self, path: &VirtualPath) -> PathBuf {
        let mut real = self.root.clone();
        for segment in path.segments() {
            real.push(segment);
        }
        real
    }

    fn virtual_path(&self, real: &Path) -> CfkResult<VirtualPath> {
        let relative = real.strip_prefix(&self.root).map_err(|_| CfkError::InvalidPath(real.display().to_string()))?;
        Ok(VirtualPath::new(relative.to_string_lossy().as_ref()))
    }

    async fn entry_at(&self, path: &VirtualPath) -> CfkResult<Entry> {
        let real = self.real_path(path);
        let meta = fs::metadata(&real).await.map_err(|e| map_not_found(e, path))?;
        Ok(Entry { path: path.clone(), kind: entry_kind(&meta), metadata: metadata_from(&meta), native_id: None, display_name: None })
    }
}

fn entry_kind(meta: &std::fs::Metadata) -> EntryKind {
    if meta.is_dir() {
        EntryKind::Directory
    } else if meta.is_file() {
        EntryKind::File
    } else if meta.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Unknown
    }
}

fn metadata_from(meta: &std::fs::Metadata) -> Metadata {
    let mut metadata = Metadata::new().with_size(meta.len());
    if let Ok(modified) = meta.modified() {
        metadata.modified = Some(modified.into());
    }
    if let Ok(created) = meta.created() {
        metadata.created = Some(created.into());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.permissions = Some(Permissions::new(meta.mode()));
    }
    metadata
}

fn map_not_found(err: std::io::Error, path: &VirtualPath) -> CfkError {
    if err.kind() == std::io::ErrorKind::NotFound {
        CfkError::ObjectNotFound(path.to_path_string())
    } else {
        CfkError::Io(err)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Local Filesystem"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn storage_config(&self) -> &StorageConfig {
        &self.config
    }

    fn addition(&self) -> &Value {
        &self.addition
    }

    async fn init(&self) -> CfkResult<()> {
        fs::create_dir_all(&self.root).await.map_err(CfkError::Io)
    }

    async fn list(&self, path: &VirtualPath, _options: &ListOptions) -> CfkResult<DirectoryListing> {
        let real = self.real_path(path);
        if !real.is_dir() {
            return Err(CfkError::NotFolder(path.to_path_string()));
        }

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&real).await.map_err(CfkError::Io)?;
        while let Some(child) = read_dir.next_entry().await.map_err(CfkError::Io)? {
            let child_path = child.path();
            let vpath = self.virtual_path(&child_path)?;
            let meta = child.metadata().await.map_err(CfkError::Io)?;
            entries.push(Entry { path: vpath, kind: entry_kind(&meta), metadata: metadata_from(&meta), native_id: None, display_name: None });
        }

        Ok(DirectoryListing::new(path.clone(), entries))
    }

    async fn link(&self, path: &VirtualPath, _options: &ReadOptions) -> CfkResult<Link> {
        let real = self.real_path(path);
        if !real.is_file() {
            return Err(CfkError::NotFile(path.to_path_string()));
        }
        let file = fs::File::open(&real).await.map_err(CfkError::Io)?;
        Ok(Link::from_direct(Box::pin(file)))
    }

    async fn get_space_info(&self) -> CfkResult<SpaceInfo> {
        Ok(SpaceInfo::unknown())
    }

    async fn get(&self, path: &VirtualPath) -> CfkResult<Entry> {
        self.entry_at(path).await
    }

    async fn get_root(&self) -> CfkResult<Entry> {
        self.entry_at(&VirtualPath::root()).await
    }

    async fn make_dir(&self, path: &VirtualPath) -> CfkResult<MutationResult> {
        let real = self.real_path(path);
        fs::create_dir_all(&real).await.map_err(CfkError::Io)?;
        Ok(MutationResult::Entry(self.entry_at(path).await?))
    }

    async fn move_object(&self, source: &VirtualPath, dest: &VirtualPath, options: &MoveOptions) -> CfkResult<MutationResult> {
        let src_real = self.real_path(source);
        let dst_real = self.real_path(dest);
        if !src_real.exists() {
            return Err(CfkError::ObjectNotFound(source.to_path_string()));
        }
        if dst_real.exists() && !options.overwrite {
            return Err(CfkError::AlreadyExists(dest.to_path_string()));
        }
        fs::rename(&src_real, &dst_real).await.map_err(CfkError::Io)?;
        Ok(MutationResult::Entry(self.entry_at(dest).await?))
    }

    async fn copy(&self, source: &VirtualPath, dest: &VirtualPath, options: &CopyOptions) -> CfkResult<MutationResult> {
        let src_real = self.real_path(source);
        let dst_real = self.real_path(dest);
        if !src_real.exists() {
            return Err(CfkError::ObjectNotFound(source.to_path_string()));
        }
        if dst_real.exists() && !options.overwrite {
            return Err(CfkError::AlreadyExists(dest.to_path_string()));
        }
        fs::copy(&src_real, &dst_real).await.map_err(CfkError::Io)?;
        Ok(MutationResult::Entry(self.entry_at(dest).await?))
    }

    async fn rename(&self, source: &VirtualPath, new_name: &str) -> CfkResult<MutationResult> {
        let dest = source.parent().unwrap_or_else(VirtualPath::root).join(new_name);
        self.move_object(source, &dest, &MoveOptions::default()).await
    }

    async fn remove(&self, path: &VirtualPath, options: &DeleteOptions) -> CfkResult<()> {
        let real = self.real_path(path);
        let meta = match fs::metadata(&real).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && options.force => return Ok(()),
            Err(e) => return Err(map_not_found(e, path)),
        };

        if meta.is_dir() {
            if options.recursive {
                fs::remove_dir_all(&real).await.map_err(CfkError::Io)?;
            } else {
                fs::remove_dir(&real).await.map_err(|e| {
                    // ENOTEMPTY on Linux; avoids a libc dependency for one constant.
                    if e.raw_os_error() == Some(39) {
                        CfkError::DirectoryNotEmpty(path.to_path_string())
                    } else {
                        CfkError::Io(e)
                    }
                })?;
            }
        } else {
            fs::remove_file(&real).await.map_err(CfkError::Io)?;
        }
        Ok(())
    }

    async fn put(&self, path: &VirtualPath, mut stream: ByteStream, _size_hint: Option<u64>, options: &WriteOptions) -> CfkResult<MutationResult> {
        use tokio::io::AsyncWriteExt;

        let real = self.real_path(path);
        if real.exists() && !options.overwrite {
            return Err(CfkError::AlreadyExists(path.to_path_string()));
        }
        if options.create_parents {
            if let Some(parent) = real.parent() {
                fs::create_dir_all(parent).await.map_err(CfkError::Io)?;
            }
        }

        let mut file = fs::File::create(&real).await.map_err(CfkError::Io)?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await.map_err(CfkError::Io)?;
        }
        file.flush().await.map_err(CfkError::Io)?;

        Ok(MutationResult::Entry(self.entry_at(path).await?))
    }

    async fn archive_meta(&self, _path: &VirtualPath) -> CfkResult<ArchiveMeta> {
        Err(CfkError::DriverExtractNotSupported(self.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (LocalBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path());
        backend.init().await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn make_dir_then_list_sees_it() {
        let (backend, _dir) = backend().await;
        backend.make_dir(&VirtualPath::new("/sub")).await.unwrap();
        let listing = backend.list(&VirtualPath::root(), &ListOptions::default()).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert!(listing.entries[0].is_directory());
    }

    #[tokio::test]
    async fn put_then_get_round_trips_metadata() {
        let (backend, _dir) = backend().await;
        let path = VirtualPath::new("/a.txt");
        let bytes = bytes::Bytes::from_static(b"hello");
        let stream: ByteStream = Box::pin(futures::stream::once(async { Ok(bytes) }));
        backend.put(&path, stream, Some(5), &WriteOptions { create_parents: true, ..Default::default() }).await.unwrap();

        let entry = backend.get(&path).await.unwrap();
        assert_eq!(entry.size(), Some(5));
    }

    #[tokio::test]
    async fn put_without_overwrite_rejects_existing_file() {
        let (backend, _dir) = backend().await;
        let path = VirtualPath::new("/a.txt");
        let make_stream = || -> ByteStream { Box::pin(futures::stream::once(async { Ok(bytes::Bytes::from_static(b"x")) })) };
        backend.put(&path, make_stream(), Some(1), &WriteOptions { create_parents: true, ..Default::default() }).await.unwrap();

        let err = backend.put(&path, make_stream(), Some(1), &WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, CfkError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_nonexistent_without_force_errors() {
        let (backend, _dir) = backend().await;
        let err = backend.remove(&VirtualPath::new("/missing"), &DeleteOptions::default()).await.unwrap_err();
        assert!(err.is_object_not_found());
    }

    #[tokio::test]
    async fn remove_nonexistent_with_force_is_ok() {
        let (backend, _dir) = backend().await;
        backend.remove(&VirtualPath::new("/missing"), &DeleteOptions { force: true, ..Default::default() }).await.unwrap();
    }
}
