//! Cross-backend move/copy dispatch onto the task-based transfer
//! engine, and the concrete `TaskRunner`s that do the work.
//!
//! A same-backend move/copy is attempted natively first; only a
//! `NotImplement`/`NotSupport` response (or genuinely different source
//! and destination backends) falls through to here. Directory payloads
//! are pure schedulers per the component design: they list, create the
//! destination directory, and hand children back to the same
//! `TaskManager` under the same group, never moving bytes themselves.

use crate::engine::{cache_err, Engine, TaskId};
use async_trait::async_trait;
use bytes::Bytes;
use cfk_core::operations::{CopyOptions, MoveOptions, WriteOptions};
use cfk_core::{ByteStream, CfkError, CfkResult, VirtualPath};
use cfk_transfer::{
    group_id, verify_with_retries, GroupAction, TaskContext, TaskKind, TaskManager, TaskPayload, TaskRunner, SeekableStream,
    MOVE_VERIFY_ATTEMPTS, MOVE_VERIFY_SPACING,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Copy,
    Move,
}

impl Engine {
    pub async fn copy(self: &Arc<Self>, source: &VirtualPath, dst_dir: &VirtualPath) -> CfkResult<Option<TaskId>> {
        self.copy_or_move(source, dst_dir, TransferKind::Copy).await
    }

    pub async fn move_(self: &Arc<Self>, source: &VirtualPath, dst_dir: &VirtualPath) -> CfkResult<Option<TaskId>> {
        self.copy_or_move(source, dst_dir, TransferKind::Move).await
    }

    /// Uploads a real local file as a background task, reporting
    /// through the same group/cache-refresh machinery as Move/Copy.
    pub async fn put_as_task(self: &Arc<Self>, dst_dir: &VirtualPath, name: &str, local_path: std::path::PathBuf, size_hint: Option<u64>) -> CfkResult<TaskId> {
        let dest = dst_dir.join(name);
        let (dst_resolved, _) = self.resolve(&dest).await?;
        let group = group_id(&dst_resolved.backend_key, &dst_resolved.actual_path);

        self.tasks
            .groups()
            .add_payload(
                &group,
                Arc::new(RefreshDstPayload {
                    engine: self.clone(),
                    dst_backend_key: dst_resolved.backend_key.clone(),
                    dst_actual: dst_resolved.actual_path.parent().unwrap_or_else(VirtualPath::root),
                }),
            )
            .await;

        let payload = TaskPayload::Upload { local_path, dest: dest.clone(), size_hint };
        let context = TaskContext::new(group, TaskKind::Upload, payload.clone());
        let runner: Arc<dyn TaskRunner> = Arc::new(UploadRunner { engine: self.clone(), payload });
        Ok(self.tasks.enqueue(context, runner).await)
    }

    async fn copy_or_move(self: &Arc<Self>, source: &VirtualPath, dst_dir: &VirtualPath, kind: TransferKind) -> CfkResult<Option<TaskId>> {
        let name = source.name().ok_or_else(|| CfkError::InvalidPath(source.to_path_string()))?.to_string();
        let dest = dst_dir.join(&name);

        let (src_resolved, src_backend) = self.resolve(source).await?;
        let (dst_resolved, dst_backend) = self.resolve(&dest).await?;

        if src_resolved.backend_key == dst_resolved.backend_key {
            let native = match kind {
                TransferKind::Copy => {
                    src_backend.copy(&src_resolved.actual_path, &dst_resolved.actual_path, &CopyOptions { overwrite: true, preserve_metadata: true }).await
                }
                TransferKind::Move => src_backend.move_object(&src_resolved.actual_path, &dst_resolved.actual_path, &MoveOptions { overwrite: true }).await,
            };
            match native {
                Ok(result) => {
                    self.apply_mutation_result(&dst_resolved, &dest, result, false).await?;
                    if kind == TransferKind::Move {
                        let src_parent_key =
                            format!("{}:{}", src_resolved.backend_key, src_resolved.actual_path.parent().unwrap_or_else(VirtualPath::root).to_path_string());
                        self.cache.patch_listing_remove(&src_parent_key, &src_resolved.actual_path).await.map_err(cache_err)?;
                    }
                    return Ok(None);
                }
                Err(e) if e.is_not_implement() || e.is_not_support() => {}
                Err(e) => return Err(e),
            }
        } else if dst_backend.storage_config().no_upload {
            return Err(CfkError::UploadNotSupported(dst_resolved.backend_key.clone()));
        }

        let group = group_id(&dst_resolved.backend_key, &dst_resolved.actual_path);
        self.tasks
            .groups()
            .add_payload(
                &group,
                Arc::new(RefreshDstPayload { engine: self.clone(), dst_backend_key: dst_resolved.backend_key.clone(), dst_actual: dst_resolved.actual_path.clone() }),
            )
            .await;

        let source_entry = self.get(source, false).await?;
        let payload = if source_entry.is_directory() {
            TaskPayload::Directory { source: source.clone(), dest: dest.clone() }
        } else {
            TaskPayload::Leaf { source: Some(source.clone()), dest: dest.clone(), size_hint: source_entry.size() }
        };

        let task_kind = match kind {
            TransferKind::Copy => TaskKind::Copy,
            TransferKind::Move => TaskKind::Move,
        };
        let context = TaskContext::new(group.clone(), task_kind, payload.clone());
        let runner: Arc<dyn TaskRunner> = Arc::new(TransferRunner { engine: self.clone(), kind, payload, group_id: group });
        Ok(Some(self.tasks.enqueue(context, runner).await))
    }
}

struct RefreshDstPayload {
    engine: Arc<Engine>,
    dst_backend_key: String,
    dst_actual: VirtualPath,
}

#[async_trait]
impl GroupAction for RefreshDstPayload {
    async fn run(&self) {
        let key = format!("{}:{}", self.dst_backend_key, self.dst_actual.to_path_string());
        let _ = self.engine.cache.invalidate_listing(&key).await;
    }
}

/// Lets sibling modules (e.g. archive downloads) register the same
/// destination-refresh action without exposing `RefreshDstPayload` itself.
pub(crate) fn refresh_dst_payload(engine: Arc<Engine>, dst_backend_key: String, dst_actual: VirtualPath) -> impl GroupAction {
    RefreshDstPayload { engine, dst_backend_key, dst_actual }
}

struct RemoveSourceDirPayload {
    engine: Arc<Engine>,
    source: VirtualPath,
}

#[async_trait]
impl GroupAction for RemoveSourceDirPayload {
    async fn run(&self) {
        let _ = self.engine.remove(&self.source).await;
    }

    fn runs_on_failure(&self) -> bool {
        false
    }
}

struct TransferRunner {
    engine: Arc<Engine>,
    kind: TransferKind,
    payload: TaskPayload,
    group_id: String,
}

#[async_trait]
impl TaskRunner for TransferRunner {
    fn max_retries(&self) -> u32 {
        2
    }

    async fn run(&self, scheduler: &TaskManager, cancel: &CancellationToken) -> CfkResult<()> {
        match &self.payload {
            TaskPayload::Directory { source, dest } => self.run_directory(scheduler, cancel, source, dest).await,
            TaskPayload::Leaf { source, dest, .. } => {
                let source = source.as_ref().ok_or_else(|| CfkError::InvalidPath(dest.to_path_string()))?;
                self.run_leaf(cancel, source, dest).await
            }
            TaskPayload::Upload { .. } => Err(CfkError::Other("upload payloads run through UploadRunner".into())),
        }
    }
}

impl TransferRunner {
    async fn run_directory(&self, scheduler: &TaskManager, cancel: &CancellationToken, source: &VirtualPath, dest: &VirtualPath) -> CfkResult<()> {
        if cancel.is_cancelled() {
            return Err(CfkError::Cancelled);
        }
        self.engine.make_dir(dest, true).await?;

        let entries = self.engine.list(source, false).await?;
        for entry in entries {
            let Some(name) = entry.name() else { continue };
            let child_source = source.join(name);
            let child_dest = dest.join(name);
            let child_payload = if entry.is_directory() {
                TaskPayload::Directory { source: child_source, dest: child_dest }
            } else {
                TaskPayload::Leaf { source: Some(child_source), dest: child_dest, size_hint: entry.size() }
            };

            let task_kind = match self.kind {
                TransferKind::Copy => TaskKind::Copy,
                TransferKind::Move => TaskKind::Move,
            };
            let context = TaskContext::new(self.group_id.clone(), task_kind, child_payload.clone());
            let runner: Arc<dyn TaskRunner> =
                Arc::new(TransferRunner { engine: self.engine.clone(), kind: self.kind, payload: child_payload, group_id: self.group_id.clone() });
            scheduler.enqueue(context, runner).await;
        }

        if self.kind == TransferKind::Move {
            scheduler
                .groups()
                .add_payload(&self.group_id, Arc::new(RemoveSourceDirPayload { engine: self.engine.clone(), source: source.clone() }))
                .await;
        }
        Ok(())
    }

    async fn run_leaf(&self, cancel: &CancellationToken, source: &VirtualPath, dest: &VirtualPath) -> CfkResult<()> {
        if cancel.is_cancelled() {
            return Err(CfkError::Cancelled);
        }

        let (link, entry) = self.engine.link(source, &Default::default()).await?;
        let _guard = link.acquire();
        let total = entry.size();
        let byte_stream = stream_from_link(&link, self.engine.stream_cache_dir());

        let (dst_resolved, dst_backend) = self.engine.resolve(dest).await?;
        self.engine.ensure_working(&dst_resolved, &dst_backend).await?;
        let options = WriteOptions { overwrite: true, create_parents: true, ..Default::default() };
        let result = dst_backend.put(&dst_resolved.actual_path, byte_stream, total, &options).await?;
        self.engine.apply_mutation_result(&dst_resolved, dest, result, true).await?;

        if self.kind == TransferKind::Move {
            let verified = verify_with_retries(
                || {
                    let engine = self.engine.clone();
                    let dest = dest.clone();
                    async move { engine.get(&dest, true).await.is_ok() }
                },
                MOVE_VERIFY_ATTEMPTS,
                MOVE_VERIFY_SPACING,
            )
            .await;

            if !verified {
                return Err(CfkError::Other(format!("move verification failed for {dest}")));
            }
            self.engine.remove(source).await?;
        }
        Ok(())
    }
}

pub(crate) struct UploadRunner {
    engine: Arc<Engine>,
    payload: TaskPayload,
}

/// Lets sibling modules (e.g. archive downloads) build an `UploadRunner`
/// for a plain local-file upload without the struct's fields being public.
pub(crate) fn upload_runner(engine: Arc<Engine>, payload: TaskPayload) -> UploadRunner {
    UploadRunner { engine, payload }
}

#[async_trait]
impl TaskRunner for UploadRunner {
    fn max_retries(&self) -> u32 {
        2
    }

    async fn run(&self, _scheduler: &TaskManager, cancel: &CancellationToken) -> CfkResult<()> {
        let TaskPayload::Upload { local_path, dest, size_hint } = &self.payload else {
            return Err(CfkError::Other("UploadRunner given a non-upload payload".into()));
        };
        if cancel.is_cancelled() {
            return Err(CfkError::Cancelled);
        }

        let file = tokio::fs::File::open(local_path).await.map_err(CfkError::Io)?;
        let byte_stream = stream_from_file(file);

        let (resolved, backend) = self.engine.resolve(dest).await?;
        self.engine.ensure_working(&resolved, &backend).await?;
        let options = WriteOptions { overwrite: true, create_parents: true, ..Default::default() };
        let result = backend.put(&resolved.actual_path, byte_stream, *size_hint, &options).await?;
        self.engine.apply_mutation_result(&resolved, dest, result, true).await
    }
}

const CHUNK_SIZE: usize = 256 * 1024;

fn stream_from_link(link: &cfk_core::Link, cache_dir: std::path::PathBuf) -> ByteStream {
    let stream = Arc::new(tokio::sync::Mutex::new(SeekableStream::new(link, cache_dir)));
    Box::pin(futures::stream::unfold(stream, |stream| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut guard = stream.lock().await;
        match guard.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                drop(guard);
                Some((Ok(Bytes::from(buf)), stream))
            }
            Err(e) => Some((Err(e), stream)),
        }
    }))
}

fn stream_from_file(file: tokio::fs::File) -> ByteStream {
    let file = Arc::new(tokio::sync::Mutex::new(file));
    Box::pin(futures::stream::unfold(file, |file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut guard = file.lock().await;
        match guard.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                drop(guard);
                Some((Ok(Bytes::from(buf)), file))
            }
            Err(e) => Some((Err(CfkError::Io(e)), file)),
        }
    }))
}
