//! Task group coordination
//!
//! All tasks spawned for one user-level Move/Copy/Decompress share a
//! group id. The coordinator counts outstanding tasks and, once the
//! last one finishes, runs the group's payloads (cache refresh, source
//! deletion, ...) exactly once. A failure anywhere in the group flips
//! its success flag, which suppresses "remove source" payloads.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// A deferred action run once a group's task count reaches zero.
/// `RemoveSource` actions are skipped if the group ended in failure.
#[async_trait]
pub trait GroupAction: Send + Sync {
    async fn run(&self);

    /// Whether this action should still run if the group failed.
    /// Cache-refresh style actions default to running regardless;
    /// source-deletion actions override this to `false`.
    fn runs_on_failure(&self) -> bool {
        true
    }
}

struct TaskGroup {
    count: u64,
    success: bool,
    payloads: Vec<Arc<dyn GroupAction>>,
}

impl TaskGroup {
    fn new() -> Self {
        Self { count: 0, success: true, payloads: Vec::new() }
    }
}

/// Tracks all in-flight groups. One instance is shared (via `Arc`) by
/// every task the manager runs.
pub struct GroupCoordinator {
    groups: Mutex<HashMap<String, TaskGroup>>,
}

impl Default for GroupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self { groups: Mutex::new(HashMap::new()) }
    }

    /// Registers one more outstanding task under `group_id`, creating
    /// the group if this is its first task. Called by `TaskManager::enqueue`
    /// at scheduling time; also used to re-register a task retried after
    /// the group reformed following a restart.
    pub async fn add_task(&self, group_id: &str) {
        let mut groups = self.groups.lock().await;
        groups.entry(group_id.to_string()).or_insert_with(TaskGroup::new).count += 1;
    }

    /// Queues a payload to run when `group_id`'s count reaches zero.
    /// Creates the group if it doesn't exist yet, so a caller can
    /// register payloads before any task of the group has even been
    /// enqueued without racing a premature reap.
    pub async fn add_payload(&self, group_id: &str, action: Arc<dyn GroupAction>) {
        let mut groups = self.groups.lock().await;
        groups.entry(group_id.to_string()).or_insert_with(TaskGroup::new).payloads.push(action);
    }

    /// Reports one task's completion. Runs and reaps the group's
    /// payloads once the count hits zero.
    pub async fn done(&self, group_id: &str, success: bool) {
        let finished = {
            let mut groups = self.groups.lock().await;
            let Some(group) = groups.get_mut(group_id) else {
                warn!(group_id, "done() called for an unknown or already-reaped group");
                return;
            };
            group.success &= success;
            group.count = group.count.saturating_sub(1);
            if group.count == 0 {
                groups.remove(group_id)
            } else {
                None
            }
        };

        if let Some(group) = finished {
            for action in group.payloads {
                if group.success || action.runs_on_failure() {
                    action.run().await;
                }
            }
        }
    }

    pub async fn outstanding(&self, group_id: &str) -> Option<u64> {
        self.groups.lock().await.get(group_id).map(|g| g.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl GroupAction for Counter {
        async fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RemoveSource(Arc<AtomicBool>);

    #[async_trait]
    impl GroupAction for RemoveSource {
        async fn run(&self) {
            self.0.store(true, Ordering::SeqCst);
        }

        fn runs_on_failure(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn payloads_run_once_count_reaches_zero() {
        let coordinator = GroupCoordinator::new();
        let ran = Arc::new(AtomicUsize::new(0));

        coordinator.add_task("g1").await;
        coordinator.add_task("g1").await;
        coordinator.add_payload("g1", Arc::new(Counter(ran.clone()))).await;

        coordinator.done("g1", true).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0, "payload must not run before the last task finishes");

        coordinator.done("g1", true).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_suppresses_remove_source_payload() {
        let coordinator = GroupCoordinator::new();
        let removed = Arc::new(AtomicBool::new(false));

        coordinator.add_task("g1").await;
        coordinator.add_task("g1").await;
        coordinator.add_payload("g1", Arc::new(RemoveSource(removed.clone()))).await;

        coordinator.done("g1", false).await;
        coordinator.done("g1", true).await;

        assert!(!removed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn group_is_reaped_after_completion() {
        let coordinator = GroupCoordinator::new();
        coordinator.add_task("g1").await;
        coordinator.done("g1", true).await;
        assert_eq!(coordinator.outstanding("g1").await, None);
    }

    #[tokio::test]
    async fn re_registering_a_reformed_group_works_after_restart() {
        let coordinator = GroupCoordinator::new();
        coordinator.add_task("g1").await;
        coordinator.done("g1", true).await;

        // Simulated restart: the group no longer exists, but a retried
        // task re-registers itself rather than erroring out.
        coordinator.add_task("g1").await;
        assert_eq!(coordinator.outstanding("g1").await, Some(1));
    }
}
