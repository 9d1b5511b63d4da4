//! Persisted configuration row shapes
//!
//! Schema only — no SQL dialect or migration tooling. These are the
//! serde shapes a caller would store storage/setting/task rows in,
//! mirroring what the façade's registry and transfer engine need to
//! survive a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the persisted storage table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfigRow {
    pub id: i64,
    pub mount_path: String,
    pub driver: String,
    pub order: i32,
    pub remark: String,
    pub disabled: bool,
    pub cache_expiration_secs: i64,
    pub addition: Value,
    pub status: String,
    pub modified: DateTime<Utc>,
}

/// One row of the persisted setting table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingItemRow {
    pub key: String,
    pub value: String,
    pub group: String,
    pub flags: i32,
}

/// An authorized SSH public key, for the SSH-key-auth surface named
/// alongside storage/setting rows in the external-interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshPublicKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub fingerprint: String,
    pub added: DateTime<Utc>,
}

/// Durable record of an in-flight or completed transfer task, enough
/// to resume a task group after a crash/restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub group_id: String,
    pub creator: String,
    pub state: String,
    pub progress: f32,
    pub total_bytes: Option<u64>,
    pub current_bytes: u64,
    pub status: String,
    pub retry_count: u32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub payload: Value,
}
