//! Worker-pool task manager
//!
//! A fixed pool of tokio tasks drains a shared queue. A task's group
//! count is incremented in `enqueue`, at scheduling time — not when a
//! worker later dequeues it — so a parent task (e.g. a directory
//! transfer) can enqueue its children and know they're already counted
//! before it returns and the manager reports the parent itself done.
//! Counting at dequeue time would let the group's count touch zero (and
//! its payloads reap) after the parent finishes but before a
//! just-enqueued child has registered. Each job's count is balanced by
//! `GroupCoordinator::done` once the runner (including retries)
//! settles; the runner itself decides how many retries it wants and
//! whether a given failure is worth retrying at all (via
//! `CfkError::is_retryable`).

use async_trait::async_trait;
use cfk_core::{CfkError, CfkResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::group::GroupCoordinator;
use crate::task::{Task, TaskContext, TaskStatus};

/// What a worker actually executes for one task. Directory tasks
/// enqueue their children through the `scheduler` handle they're given
/// rather than returning a list — the manager doesn't need to know
/// anything about a runner's internal fan-out.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, scheduler: &TaskManager, cancel: &CancellationToken) -> CfkResult<()>;

    /// Number of retries beyond the first attempt. Only retried when
    /// the returned error is itself retryable.
    fn max_retries(&self) -> u32 {
        0
    }
}

struct Job {
    task: Task,
    runner: Arc<dyn TaskRunner>,
}

struct Inner {
    sender: mpsc::UnboundedSender<Job>,
    next_id: AtomicU64,
    groups: Arc<GroupCoordinator>,
    cancel: CancellationToken,
}

pub struct TaskManagerConfig {
    pub workers: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Cheap to clone — every clone shares the same queue, group
/// coordinator, and cancellation token.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Spawns the worker pool and returns the manager handle alongside
    /// the workers' join handles (awaited on shutdown).
    pub fn start(config: TaskManagerConfig) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            sender,
            next_id: AtomicU64::new(0),
            groups: Arc::new(GroupCoordinator::new()),
            cancel: CancellationToken::new(),
        });
        let manager = TaskManager { inner };

        let receiver = Arc::new(Mutex::new(receiver));
        let workers = config.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let receiver = receiver.clone();
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else { break };
                    manager.execute(job).await;
                }
            }));
        }
        (manager, handles)
    }

    pub fn groups(&self) -> &Arc<GroupCoordinator> {
        &self.inner.groups
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Halts further enqueues from taking effect and signals in-flight
    /// runners to abort at their next checkpoint. Already-queued jobs
    /// still get dequeued and immediately marked canceled.
    pub fn cancel_all(&self) {
        self.inner.cancel.cancel();
    }

    /// Queues a task under `context.group_id`, registering it with the
    /// group coordinator before this call returns. Returns the assigned
    /// task id.
    pub async fn enqueue(&self, context: TaskContext, runner: Arc<dyn TaskRunner>) -> u64 {
        self.inner.groups.add_task(&context.group_id).await;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let group_id = context.group_id.clone();
        let task = Task::new(id, context);
        if self.inner.sender.send(Job { task, runner }).is_err() {
            warn!(task_id = id, "enqueue after worker pool shutdown");
            self.inner.groups.done(&group_id, false).await;
        }
        id
    }

    async fn execute(&self, job: Job) {
        let Job { mut task, runner } = job;

        if self.inner.cancel.is_cancelled() {
            task.status = TaskStatus::Canceled;
            self.inner.groups.done(&task.context.group_id, false).await;
            return;
        }

        task.status = TaskStatus::Running;
        let max_retries = runner.max_retries();
        let mut result: CfkResult<()> = Err(CfkError::Other("task never ran".into()));

        for attempt in 0..=max_retries {
            if self.inner.cancel.is_cancelled() {
                task.status = TaskStatus::Canceled;
                result = Err(CfkError::Cancelled);
                break;
            }
            match runner.run(self, &self.inner.cancel).await {
                Ok(()) => {
                    task.status = TaskStatus::Succeeded;
                    result = Ok(());
                    break;
                }
                Err(e) if attempt < max_retries && e.is_retryable() => {
                    warn!(task_id = task.id, attempt, error = %e, "retrying task");
                    task.retry_count += 1;
                    result = Err(e);
                    continue;
                }
                Err(e) => {
                    task.status = TaskStatus::Failed;
                    result = Err(e);
                    break;
                }
            }
        }

        self.inner.groups.done(&task.context.group_id, result.is_ok()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskKind, TaskPayload};
    use cfk_core::VirtualPath;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Succeeds(Arc<AtomicU32>);

    #[async_trait]
    impl TaskRunner for Succeeds {
        async fn run(&self, _scheduler: &TaskManager, _cancel: &CancellationToken) -> CfkResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailsThenSucceeds(Arc<AtomicU32>);

    #[async_trait]
    impl TaskRunner for FailsThenSucceeds {
        async fn run(&self, _scheduler: &TaskManager, _cancel: &CancellationToken) -> CfkResult<()> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(CfkError::Network("connection reset".into()))
            } else {
                Ok(())
            }
        }

        fn max_retries(&self) -> u32 {
            2
        }
    }

    fn leaf_context(group: &str) -> TaskContext {
        TaskContext::new(
            group,
            TaskKind::Copy,
            TaskPayload::Leaf { source: Some(VirtualPath::new("/src/f")), dest: VirtualPath::new("/dst/f"), size_hint: None },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_task_runs_and_the_group_completes() {
        let (manager, _handles) = TaskManager::start(TaskManagerConfig { workers: 2 });
        let calls = Arc::new(AtomicU32::new(0));

        manager.enqueue(leaf_context("g1"), Arc::new(Succeeds(calls.clone()))).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.groups().outstanding("g1").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retryable_failure_is_retried_until_max_retries() {
        let (manager, _handles) = TaskManager::start(TaskManagerConfig { workers: 1 });
        let calls = Arc::new(AtomicU32::new(0));

        manager.enqueue(leaf_context("g1"), Arc::new(FailsThenSucceeds(calls.clone()))).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_all_prevents_pending_tasks_from_running() {
        let (manager, _handles) = TaskManager::start(TaskManagerConfig { workers: 1 });
        let calls = Arc::new(AtomicU32::new(0));

        manager.cancel_all();
        manager.enqueue(leaf_context("g1"), Arc::new(Succeeds(calls.clone()))).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct EnqueuesChild {
        scheduled: Arc<AtomicU32>,
        child_group: String,
    }

    #[async_trait]
    impl TaskRunner for EnqueuesChild {
        async fn run(&self, scheduler: &TaskManager, _cancel: &CancellationToken) -> CfkResult<()> {
            scheduler.enqueue(leaf_context(&self.child_group), Arc::new(Succeeds(self.scheduled.clone()))).await;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn a_child_enqueued_mid_run_is_counted_before_the_parent_reaps() {
        let (manager, _handles) = TaskManager::start(TaskManagerConfig { workers: 4 });
        let scheduled = Arc::new(AtomicU32::new(0));

        manager
            .enqueue(leaf_context("parent-group"), Arc::new(EnqueuesChild { scheduled: scheduled.clone(), child_group: "parent-group".to_string() }))
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(manager.groups().outstanding("parent-group").await, None);
    }
}
