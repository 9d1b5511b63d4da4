//! Task shapes shared by copy, move, upload, and archive transfers
//!
//! All four task flavors named in the component design share one
//! skeleton: resolve backends, decide leaf-vs-directory, and either
//! enqueue children or move bytes. The scheduler (`TaskManager`), not
//! the task itself, drives directory recursion — a task only ever
//! describes what it wants done, never loops over its own children.

use cfk_core::VirtualPath;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Copy,
    Move,
    Upload,
    ArchiveDownload,
    ArchiveContentUpload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// What a single task acts on. A `Directory` task is purely a
/// scheduler: it lists the source, creates the destination directory,
/// and hands its children back to the manager as new tasks under the
/// same group, then finishes without moving any bytes itself.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Leaf { source: Option<VirtualPath>, dest: VirtualPath, size_hint: Option<u64> },
    Directory { source: VirtualPath, dest: VirtualPath },
    /// An `UploadTask` whose bytes come from a real local file rather
    /// than another mounted backend, so the context can be rebuilt
    /// (and the file reopened) on every retry attempt.
    Upload { local_path: PathBuf, dest: VirtualPath, size_hint: Option<u64> },
}

impl TaskPayload {
    pub fn dest(&self) -> &VirtualPath {
        match self {
            TaskPayload::Leaf { dest, .. } => dest,
            TaskPayload::Directory { dest, .. } => dest,
            TaskPayload::Upload { dest, .. } => dest,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TaskPayload::Directory { .. })
    }
}

/// Immutable description of one task's work, re-created fresh on every
/// retry attempt (per-run timing and context are not carried across
/// retries, per the component design's "reinitialize per-task context"
/// step).
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub group_id: String,
    pub kind: TaskKind,
    pub payload: TaskPayload,
}

impl TaskContext {
    pub fn new(group_id: impl Into<String>, kind: TaskKind, payload: TaskPayload) -> Self {
        Self { group_id: group_id.into(), kind, payload }
    }
}

/// A scheduled unit of work as the manager tracks it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub context: TaskContext,
    pub status: TaskStatus,
    pub retry_count: u32,
}

impl Task {
    pub fn new(id: u64, context: TaskContext) -> Self {
        Self { id, context, status: TaskStatus::Pending, retry_count: 0 }
    }
}

/// Builds the group id a Move/Copy/Decompress's tasks share:
/// `join(dst_mount, dst_actual_path)`.
pub fn group_id(dst_mount: &str, dst_actual_path: &VirtualPath) -> String {
    format!("{dst_mount}:{}", dst_actual_path.to_path_string())
}

/// Polls `check` up to `attempts` times, spaced `interval` apart,
/// returning true as soon as it reports success. Used by Move tasks to
/// confirm the destination file exists before removing the source
/// (3 attempts / 1s spacing per the component design).
pub async fn verify_with_retries<F, Fut>(mut check: F, attempts: u32, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for attempt in 0..attempts {
        if check().await {
            return true;
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

/// Default Move-destination verification policy: 3 attempts, 1s apart.
pub const MOVE_VERIFY_ATTEMPTS: u32 = 3;
pub const MOVE_VERIFY_SPACING: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn verify_with_retries_succeeds_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let ok = verify_with_retries(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                n == 1
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn verify_with_retries_gives_up_after_all_attempts() {
        let ok = verify_with_retries(|| async { false }, 3, Duration::from_millis(1)).await;
        assert!(!ok);
    }

    #[test]
    fn group_id_joins_mount_and_path() {
        assert_eq!(group_id("gdrive", &VirtualPath::new("/a/b")), "gdrive:/a/b");
    }

    #[test]
    fn directory_payload_is_a_scheduler_not_a_worker() {
        let payload = TaskPayload::Directory { source: VirtualPath::new("/src"), dest: VirtualPath::new("/dst") };
        assert!(payload.is_directory());
    }
}
