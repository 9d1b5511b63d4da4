//! Archive browsing/extraction façade operations.
//!
//! Mirrors the native-vs-tool split the component design calls for: a
//! backend that natively understands archives (e.g. a provider with
//! server-side unzip) is asked first; everything else is staged
//! locally (downloading and concatenating multi-part siblings as
//! needed) and handed to `cfk_archive`'s extension-dispatched tools.

use crate::engine::{cache_err, Engine, TaskId};
use async_trait::async_trait;
use cfk_archive::{detect_multipart, format_part_name};
use cfk_cache::CacheError;
use cfk_core::{ArchiveEntry, ArchiveMeta, CfkError, CfkResult, Entry, Metadata, VirtualPath};
use cfk_transfer::{group_id, GroupAction, SeekableStream, TaskContext, TaskKind, TaskManager, TaskPayload, TaskRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl Engine {
    /// Returns an archive's metadata (tree, multipart info, encrypted
    /// flag), trying the backend's native reader before staging and
    /// inspecting the file locally.
    pub async fn archive_meta(&self, path: &VirtualPath) -> CfkResult<ArchiveMeta> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;

        match backend.archive_meta(&resolved.actual_path).await {
            Ok(meta) => return Ok(meta),
            Err(e) if e.is_driver_extract_not_supported() => {}
            Err(e) => return Err(e),
        }

        let name = path.name().ok_or_else(|| CfkError::InvalidPath(path.to_path_string()))?.to_string();
        let key = format!("archive-meta:{}:{}", resolved.backend_key, resolved.actual_path.to_path_string());
        let ttl = self.registry.cache_expiration_secs(&resolved.backend_key).await.filter(|s| *s > 0).map(chrono::Duration::seconds);

        let path = path.clone();
        self.cache
            .archive_meta(&key, ttl, || async move {
                let (local_path, _staging) = self.stage_archive(&path, &name).await.map_err(CacheError::Upstream)?;
                let tree = self.archive.list(&name, local_path).await.map_err(CacheError::Upstream)?;
                Ok(ArchiveMeta { encrypted: false, tree: Some(tree), multipart: detect_multipart(&name) })
            })
            .await
            .map_err(cache_err)
    }

    /// Lists one level of children under `inner_path` inside the
    /// archive at `path`, synthesized as ordinary `Entry`s so the
    /// façade's caller can browse an archive the same way as a folder.
    pub async fn archive_list(&self, path: &VirtualPath, inner_path: &VirtualPath) -> CfkResult<Vec<Entry>> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;

        if let Ok(listing) = backend.archive_list(&resolved.actual_path, inner_path).await {
            return Ok(listing.entries);
        }

        let meta = self.archive_meta(path).await?;
        let tree = meta.tree.ok_or_else(|| CfkError::MetaNotFound(path.to_path_string()))?;
        let node = tree.walk(inner_path.segments()).ok_or_else(|| CfkError::ObjectNotFound(inner_path.to_path_string()))?;
        if !node.is_dir {
            return Err(CfkError::NotFolder(inner_path.to_path_string()));
        }

        Ok(node
            .children
            .iter()
            .map(|child| archive_entry_to_entry(inner_path.join(&child.name), child))
            .collect())
    }

    /// Extracts one inner file via the backend's native capability,
    /// without staging the archive locally.
    pub async fn archive_native_extract(&self, path: &VirtualPath, inner_path: &VirtualPath, dest: &VirtualPath) -> CfkResult<()> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;
        if !backend.capabilities().archive_decompress {
            return Err(CfkError::DriverExtractNotSupported(path.to_path_string()));
        }
        let (dest_resolved, _) = self.resolve(dest).await?;
        backend.archive_decompress(&resolved.actual_path, inner_path, &dest_resolved.actual_path).await
    }

    /// Extracts a single inner file synchronously: stages the archive
    /// (and any multi-part siblings) locally, extracts just that entry,
    /// then uploads it to `dest_dir` under its own name.
    pub async fn archive_extract_one(&self, path: &VirtualPath, inner_path: &VirtualPath, dest_dir: &VirtualPath) -> CfkResult<Entry> {
        let name = path.name().ok_or_else(|| CfkError::InvalidPath(path.to_path_string()))?.to_string();
        let (local_path, staging) = self.stage_archive(path, &name).await?;

        let inner_name = inner_path.name().ok_or_else(|| CfkError::InvalidPath(inner_path.to_path_string()))?;
        let dest_file = staging.path().join(inner_name);
        self.archive.extract_one(&name, local_path, inner_path.to_path_string().trim_start_matches('/').to_string(), dest_file.clone()).await?;

        let bytes = tokio::fs::read(&dest_file).await.map_err(CfkError::Io)?;
        let size = bytes.len() as u64;
        let stream: cfk_core::ByteStream = Box::pin(futures::stream::once(async move { Ok(bytes::Bytes::from(bytes)) }));
        self.put(dest_dir, inner_name, stream, Some(size), false).await
    }

    /// Dispatches a whole-archive extraction as a background task:
    /// stage + extract locally (`TaskKind::ArchiveDownload`), then one
    /// `TaskKind::ArchiveContentUpload` task per extracted file,
    /// sharing a group so the destination listing refreshes and the
    /// staging directory is cleaned up exactly once.
    pub async fn archive_download_as_task(self: &Arc<Self>, path: &VirtualPath, dest_dir: &VirtualPath) -> CfkResult<TaskId> {
        let (dst_resolved, dst_backend) = self.resolve(dest_dir).await?;
        if dst_backend.storage_config().no_upload {
            return Err(CfkError::UploadNotSupported(dst_resolved.backend_key.clone()));
        }

        let group = group_id(&dst_resolved.backend_key, &dst_resolved.actual_path);
        self.tasks
            .groups()
            .add_payload(
                &group,
                Arc::new(super::transfer::refresh_dst_payload(self.clone(), dst_resolved.backend_key.clone(), dst_resolved.actual_path.clone())),
            )
            .await;

        let payload = TaskPayload::Leaf { source: Some(path.clone()), dest: dest_dir.clone(), size_hint: None };
        let context = TaskContext::new(group.clone(), TaskKind::ArchiveDownload, payload.clone());
        let runner: Arc<dyn TaskRunner> = Arc::new(ArchiveDownloadRunner { engine: self.clone(), payload, group_id: group });
        Ok(self.tasks.enqueue(context, runner).await)
    }

    /// Stages `path` (and any multi-part siblings detected from its
    /// name) to a local temp file, returning the path and the owning
    /// `TempDir` (drop it once extraction is done to clean up).
    pub(crate) async fn stage_archive(&self, path: &VirtualPath, archive_name: &str) -> CfkResult<(PathBuf, tempfile::TempDir)> {
        let multipart = detect_multipart(archive_name);
        let parent = path.parent().unwrap_or_else(VirtualPath::root);

        let mut part_paths = vec![path.clone()];
        if let Some(info) = &multipart {
            let mut n = info.second_part_index;
            loop {
                let part_name = format_part_name(&info.part_file_format, n);
                let part_path = parent.join(&part_name);
                if self.get(&part_path, false).await.is_err() {
                    break;
                }
                part_paths.push(part_path);
                n += 1;
            }
        }

        let staging = tempfile::tempdir().map_err(CfkError::Io)?;
        let mut streams = Vec::with_capacity(part_paths.len());
        let mut guards = Vec::with_capacity(part_paths.len());
        for part_path in &part_paths {
            let (link, _entry) = self.link(part_path, &Default::default()).await?;
            guards.push(link.acquire());
            streams.push(SeekableStream::new(&link, self.stream_cache_dir()));
        }

        let local_path = self.archive.stage(archive_name, streams, staging.path()).await?;
        drop(guards);
        Ok((local_path, staging))
    }
}

fn archive_entry_to_entry(virtual_path: VirtualPath, node: &ArchiveEntry) -> Entry {
    let mut metadata = Metadata::new();
    metadata.size = Some(node.size);
    if node.is_dir {
        Entry::directory(virtual_path, metadata)
    } else {
        Entry::file(virtual_path, metadata)
    }
}

struct ArchiveDownloadRunner {
    engine: Arc<Engine>,
    payload: TaskPayload,
    group_id: String,
}

#[async_trait]
impl TaskRunner for ArchiveDownloadRunner {
    fn max_retries(&self) -> u32 {
        1
    }

    async fn run(&self, scheduler: &TaskManager, cancel: &CancellationToken) -> CfkResult<()> {
        let TaskPayload::Leaf { source, dest, .. } = &self.payload else {
            return Err(CfkError::Other("ArchiveDownloadRunner given a non-leaf payload".into()));
        };
        let source = source.as_ref().ok_or_else(|| CfkError::InvalidPath(dest.to_path_string()))?;
        if cancel.is_cancelled() {
            return Err(CfkError::Cancelled);
        }

        let name = source.name().ok_or_else(|| CfkError::InvalidPath(source.to_path_string()))?.to_string();
        let (local_path, staging) = self.engine.stage_archive(source, &name).await?;
        let extracted_dir = staging.path().join("extracted");
        self.engine.archive.extract_all(&name, local_path, extracted_dir.clone()).await?;

        let files = list_files_recursive(&extracted_dir).await?;
        for file in files {
            let relative = file.strip_prefix(&extracted_dir).unwrap_or(&file);
            let dest_path = dest.join(&relative.to_string_lossy().replace('\\', "/"));
            let size_hint = tokio::fs::metadata(&file).await.ok().map(|m| m.len());
            let upload_payload = TaskPayload::Upload { local_path: file, dest: dest_path.clone(), size_hint };
            let context = TaskContext::new(self.group_id.clone(), TaskKind::ArchiveContentUpload, upload_payload.clone());
            let runner: Arc<dyn TaskRunner> = Arc::new(crate::transfer::upload_runner(self.engine.clone(), upload_payload));
            scheduler.enqueue(context, runner).await;
        }

        scheduler
            .groups()
            .add_payload(&self.group_id, Arc::new(CleanupStagingPayload { _staging: staging }))
            .await;
        Ok(())
    }
}

struct CleanupStagingPayload {
    _staging: tempfile::TempDir,
}

#[async_trait]
impl GroupAction for CleanupStagingPayload {
    async fn run(&self) {
        // Dropping `_staging` (a `TempDir`) removes the directory tree.
    }
}

async fn list_files_recursive(dir: &std::path::Path) -> CfkResult<Vec<PathBuf>> {
    let mut stack = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(current) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&current).await.map_err(CfkError::Io)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(CfkError::Io)? {
            let file_type = entry.file_type().await.map_err(CfkError::Io)?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    Ok(files)
}
