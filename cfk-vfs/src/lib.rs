//! Virtual filesystem operations façade
//!
//! `Engine` owns the registry, resolver, cache, hook bus, and task
//! manager and exposes the operations a caller actually drives: list,
//! get, link, make_dir, remove, rename, move/copy, put, put_url, and
//! the archive family. Cross-backend move/copy dispatch onto the
//! transfer engine in `transfer`; archive browsing/extraction dispatch
//! onto `cfk_archive` in `archive_ops`.

mod archive_ops;
mod engine;
mod transfer;

pub use engine::{Engine, EngineConfig, TaskId};
pub use transfer::TransferKind;
