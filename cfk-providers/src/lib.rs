//! Storage backend implementations for Czech File Knife.
//!
//! Only the backends this workspace actually ships with live here: a
//! real local-filesystem mount and an in-process memory mount for
//! cross-backend test scenarios. Mount registration and lookup is
//! `cfk-registry::StorageRegistry`'s job, not this crate's.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
