//! Task-based transfer engine
//!
//! Drives copy, move, upload, and archive-decompress/upload operations
//! as tasks scheduled onto a worker pool, coordinated in groups so a
//! Move/Copy/Decompress's cache refresh and source cleanup happen
//! exactly once, after every child task finishes.

pub mod group;
pub mod manager;
pub mod stream;
pub mod task;

pub use group::{GroupAction, GroupCoordinator};
pub use manager::{TaskManager, TaskManagerConfig, TaskRunner};
pub use stream::{ProgressFn, RateLimiter, SeekableStream};
pub use task::{group_id, verify_with_retries, Task, TaskContext, TaskKind, TaskPayload, TaskStatus, MOVE_VERIFY_ATTEMPTS, MOVE_VERIFY_SPACING};
