//! Synchronous, in-registration-order hook bus
//!
//! Hooks today are plain callback lists fired in the order they were
//! registered, not a typed event channel — that redesign is left as a
//! possible future direction, not built here. A hook that panics is
//! caught and logged; it never aborts the operation that fired it.

use cfk_core::VirtualPath;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fired after every successful `list` against a mount.
pub type ObjectsUpdatedHook = Arc<dyn Fn(&VirtualPath) + Send + Sync>;

/// Fired when a named setting changes. May transform or reject the
/// incoming value by returning `Err`; the first rejection wins and the
/// setting change is aborted by the caller.
pub type SettingChangedHook = Arc<dyn Fn(&str, &str) -> Result<String, String> + Send + Sync>;

/// Storage registry transitions a lifecycle hook observes.
#[derive(Debug, Clone)]
pub enum StorageLifecycleEvent {
    Added { mount_path: String },
    Enabled { mount_path: String },
    Disabled { mount_path: String },
    Updated { mount_path: String },
    Removed { mount_path: String },
}

pub type StorageLifecycleHook = Arc<dyn Fn(&StorageLifecycleEvent) + Send + Sync>;

/// Registration point and dispatcher for all three hook kinds.
#[derive(Default)]
pub struct HookBus {
    objects_updated: RwLock<Vec<ObjectsUpdatedHook>>,
    setting_changed: RwLock<Vec<(String, SettingChangedHook)>>,
    storage_lifecycle: RwLock<Vec<StorageLifecycleHook>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_objects_updated(&self, hook: ObjectsUpdatedHook) {
        self.objects_updated.write().await.push(hook);
    }

    pub async fn on_setting_changed(&self, setting: impl Into<String>, hook: SettingChangedHook) {
        self.setting_changed.write().await.push((setting.into(), hook));
    }

    pub async fn on_storage_lifecycle(&self, hook: StorageLifecycleHook) {
        self.storage_lifecycle.write().await.push(hook);
    }

    pub async fn fire_objects_updated(&self, path: &VirtualPath) {
        for hook in self.objects_updated.read().await.iter() {
            if catch_unwind(AssertUnwindSafe(|| hook(path))).is_err() {
                tracing::warn!(path = %path, "objects-updated hook panicked");
            }
        }
    }

    /// Runs every hook registered for `setting` in order, threading the
    /// (possibly transformed) value through each. Stops and returns the
    /// error from the first hook that rejects it.
    pub async fn fire_setting_changed(&self, setting: &str, value: &str) -> Result<String, String> {
        let mut current = value.to_string();
        for (name, hook) in self.setting_changed.read().await.iter() {
            if name != setting {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| hook(setting, &current))) {
                Ok(result) => current = result?,
                Err(_) => {
                    tracing::warn!(setting, "setting-changed hook panicked");
                }
            }
        }
        Ok(current)
    }

    pub async fn fire_storage_lifecycle(&self, event: StorageLifecycleEvent) {
        for hook in self.storage_lifecycle.read().await.iter() {
            if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                tracing::warn!("storage-lifecycle hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn objects_updated_fires_in_registration_order() {
        let bus = HookBus::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::<u32>::new()));

        let log1 = log.clone();
        bus.on_objects_updated(Arc::new(move |_| log1.lock().unwrap().push(1))).await;

        let log2 = log.clone();
        bus.on_objects_updated(Arc::new(move |_| log2.lock().unwrap().push(2))).await;

        bus.fire_objects_updated(&VirtualPath::new("/mount")).await;
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn setting_changed_hook_can_transform_value() {
        let bus = HookBus::new();
        bus.on_setting_changed("cache_ttl", Arc::new(|_name, value| Ok(value.trim().to_string())))
            .await;

        let result = bus.fire_setting_changed("cache_ttl", "  30  ").await.unwrap();
        assert_eq!(result, "30");
    }

    #[tokio::test]
    async fn setting_changed_hook_can_reject() {
        let bus = HookBus::new();
        bus.on_setting_changed("cache_ttl", Arc::new(|_name, _value| Err("must be numeric".to_string())))
            .await;

        let result = bus.fire_setting_changed("cache_ttl", "nope").await;
        assert_eq!(result, Err("must be numeric".to_string()));
    }

    #[tokio::test]
    async fn panicking_hook_does_not_stop_remaining_hooks() {
        let bus = HookBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.on_objects_updated(Arc::new(|_| panic!("boom"))).await;

        let count2 = count.clone();
        bus.on_objects_updated(Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        bus.fire_objects_updated(&VirtualPath::new("/mount")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
