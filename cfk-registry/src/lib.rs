//! Mount-path storage registry
//!
//! Owns the map from mount path to mounted backend, and drives backend
//! lifecycle transitions (create/enable/disable/update/delete),
//! reporting failures without ever letting a backend's `init` bring
//! the registry itself down.

pub mod config;

use cfk_core::{CfkError, CfkResult, VirtualPath, StorageBackend};
use cfk_hooks::{HookBus, StorageLifecycleEvent};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lifecycle status of a mounted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageStatus {
    Pending,
    Working,
    Disabled,
    Error(String),
}

/// One mounted backend and its registry-owned bookkeeping.
pub struct StorageMount {
    pub mount_path: VirtualPath,
    pub backend: Arc<dyn StorageBackend>,
    pub order: i32,
    pub remark: String,
    pub status: StorageStatus,
    /// Another mount path this one is a pure alias for, if the backend
    /// reported one via `StorageBackend::reference`.
    pub reference_target: Option<String>,
    /// TTL the façade's cache layer uses for this mount's listings and
    /// metadata. Defaults to `DEFAULT_CACHE_EXPIRATION_SECS`; change it
    /// with `StorageRegistry::set_cache_expiration`.
    pub cache_expiration_secs: i64,
}

const MAX_REFERENCE_DEPTH: usize = 32;

/// Default listing/metadata cache TTL for a newly created mount, per
/// the persisted row's `cache_expiration_secs` column (spec §6).
pub const DEFAULT_CACHE_EXPIRATION_SECS: i64 = 300;

/// Registry of mounted storage backends, keyed by mount path.
pub struct StorageRegistry {
    mounts: RwLock<HashMap<String, StorageMount>>,
    hooks: Arc<HookBus>,
}

impl StorageRegistry {
    pub fn new(hooks: Arc<HookBus>) -> Self {
        Self { mounts: RwLock::new(HashMap::new()), hooks }
    }

    /// Register and initialize a backend at `mount_path`. A panic
    /// during `init` is caught and recorded as `StorageStatus::Error`
    /// rather than propagated.
    pub async fn create(&self, mount_path: VirtualPath, backend: Arc<dyn StorageBackend>, order: i32, remark: String) -> CfkResult<()> {
        let key = mount_path.to_path_string();

        let init_result = AssertUnwindSafe(backend.init()).catch_unwind().await;
        let status = match init_result {
            Ok(Ok(())) => StorageStatus::Working,
            Ok(Err(e)) => StorageStatus::Error(e.to_string()),
            Err(_) => StorageStatus::Error("init panicked".to_string()),
        };

        let reference_target = if matches!(status, StorageStatus::Working) {
            backend.reference().await.ok().flatten()
        } else {
            None
        };

        if let Some(ref target) = reference_target {
            self.check_reference_cycle(&key, target).await?;
        }

        let mut mounts = self.mounts.write().await;
        if mounts.contains_key(&key) {
            return Err(CfkError::Conflict(format!("mount already exists: {key}")));
        }
        mounts.insert(
            key.clone(),
            StorageMount {
                mount_path,
                backend,
                order,
                remark,
                status,
                reference_target,
                cache_expiration_secs: DEFAULT_CACHE_EXPIRATION_SECS,
            },
        );
        drop(mounts);

        self.hooks
            .fire_storage_lifecycle(StorageLifecycleEvent::Added { mount_path: key })
            .await;
        Ok(())
    }

    /// Bounded-depth walk of the reference-target chain starting at
    /// `target`, failing if it ever returns to `origin` or exceeds
    /// `MAX_REFERENCE_DEPTH` hops. Left unguarded this would hang the
    /// registry indefinitely on a misconfigured reference loop.
    async fn check_reference_cycle(&self, origin: &str, target: &str) -> CfkResult<()> {
        let mounts = self.mounts.read().await;
        let mut current = target.to_string();
        let mut visited = std::collections::HashSet::new();
        for _ in 0..MAX_REFERENCE_DEPTH {
            if current == origin {
                return Err(CfkError::Conflict(format!("reference cycle detected at {origin}")));
            }
            if !visited.insert(current.clone()) {
                return Err(CfkError::Conflict(format!("reference cycle detected at {current}")));
            }
            match mounts.get(&current).and_then(|m| m.reference_target.clone()) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        Err(CfkError::Conflict(format!("reference chain from {origin} exceeds depth {MAX_REFERENCE_DEPTH}")))
    }

    pub async fn enable(&self, mount_path: &str) -> CfkResult<()> {
        let mut mounts = self.mounts.write().await;
        let mount = mounts.get_mut(mount_path).ok_or_else(|| CfkError::StorageNotFound(mount_path.to_string()))?;

        let init_result = AssertUnwindSafe(mount.backend.init()).catch_unwind().await;
        mount.status = match init_result {
            Ok(Ok(())) => StorageStatus::Working,
            Ok(Err(e)) => StorageStatus::Error(e.to_string()),
            Err(_) => StorageStatus::Error("init panicked".to_string()),
        };
        drop(mounts);

        self.hooks
            .fire_storage_lifecycle(StorageLifecycleEvent::Enabled { mount_path: mount_path.to_string() })
            .await;
        Ok(())
    }

    pub async fn disable(&self, mount_path: &str) -> CfkResult<()> {
        let backend = {
            let mut mounts = self.mounts.write().await;
            let mount = mounts.get_mut(mount_path).ok_or_else(|| CfkError::StorageNotFound(mount_path.to_string()))?;
            mount.status = StorageStatus::Disabled;
            mount.backend.clone()
        };
        let _ = backend.shutdown().await;

        self.hooks
            .fire_storage_lifecycle(StorageLifecycleEvent::Disabled { mount_path: mount_path.to_string() })
            .await;
        Ok(())
    }

    pub async fn update(&self, mount_path: &str, order: Option<i32>, remark: Option<String>) -> CfkResult<()> {
        {
            let mut mounts = self.mounts.write().await;
            let mount = mounts.get_mut(mount_path).ok_or_else(|| CfkError::StorageNotFound(mount_path.to_string()))?;
            if let Some(order) = order {
                mount.order = order;
            }
            if let Some(remark) = remark {
                mount.remark = remark;
            }
        }
        self.hooks
            .fire_storage_lifecycle(StorageLifecycleEvent::Updated { mount_path: mount_path.to_string() })
            .await;
        Ok(())
    }

    pub async fn delete(&self, mount_path: &str) -> CfkResult<()> {
        let mount = self.mounts.write().await.remove(mount_path).ok_or_else(|| CfkError::StorageNotFound(mount_path.to_string()))?;
        let _ = mount.backend.shutdown().await;

        self.hooks
            .fire_storage_lifecycle(StorageLifecycleEvent::Removed { mount_path: mount_path.to_string() })
            .await;
        Ok(())
    }

    pub async fn get(&self, mount_path: &str) -> Option<Arc<dyn StorageBackend>> {
        self.mounts.read().await.get(mount_path).map(|m| m.backend.clone())
    }

    pub async fn cache_expiration_secs(&self, mount_path: &str) -> Option<i64> {
        self.mounts.read().await.get(mount_path).map(|m| m.cache_expiration_secs)
    }

    pub async fn set_cache_expiration(&self, mount_path: &str, secs: i64) -> CfkResult<()> {
        let mut mounts = self.mounts.write().await;
        let mount = mounts.get_mut(mount_path).ok_or_else(|| CfkError::StorageNotFound(mount_path.to_string()))?;
        mount.cache_expiration_secs = secs;
        Ok(())
    }

    pub async fn status(&self, mount_path: &str) -> Option<StorageStatus> {
        self.mounts.read().await.get(mount_path).map(|m| m.status.clone())
    }

    /// All mount paths currently registered, regardless of status,
    /// for the resolver's longest-prefix search.
    pub async fn mount_paths(&self) -> Vec<String> {
        self.mounts.read().await.keys().cloned().collect()
    }

    pub async fn is_working(&self, mount_path: &str) -> bool {
        matches!(self.mounts.read().await.get(mount_path).map(|m| &m.status), Some(StorageStatus::Working))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cfk_core::{ByteStream, DirectoryListing, Link, ListOptions, ReadOptions, StorageCapabilities, StorageConfig};
    use serde_json::Value;

    struct StubBackend {
        id: String,
        fails_init: bool,
        reference_target: Option<String>,
        caps: StorageCapabilities,
        cfg: StorageConfig,
        addition: Value,
    }

    #[async_trait]
    impl StorageBackend for StubBackend {
        fn id(&self) -> &str { &self.id }
        fn display_name(&self) -> &str { &self.id }
        fn capabilities(&self) -> &StorageCapabilities { &self.caps }
        fn storage_config(&self) -> &StorageConfig { &self.cfg }
        fn addition(&self) -> &Value { &self.addition }

        async fn init(&self) -> CfkResult<()> {
            if self.fails_init {
                Err(CfkError::Other("boom".into()))
            } else {
                Ok(())
            }
        }

        async fn list(&self, path: &VirtualPath, _options: &ListOptions) -> CfkResult<DirectoryListing> {
            Ok(DirectoryListing::new(path.clone(), vec![]))
        }

        async fn link(&self, _path: &VirtualPath, _options: &ReadOptions) -> CfkResult<Link> {
            unimplemented!()
        }

        async fn reference(&self) -> CfkResult<Option<String>> {
            Ok(self.reference_target.clone())
        }
    }

    fn stub(id: &str) -> Arc<dyn StorageBackend> {
        Arc::new(StubBackend {
            id: id.to_string(),
            fails_init: false,
            reference_target: None,
            caps: StorageCapabilities::read_only(),
            cfg: StorageConfig::default(),
            addition: Value::Null,
        })
    }

    #[tokio::test]
    async fn create_marks_working_on_successful_init() {
        let registry = StorageRegistry::new(Arc::new(HookBus::new()));
        registry.create(VirtualPath::new("/a"), stub("a"), 0, String::new()).await.unwrap();
        assert_eq!(registry.status("/a").await, Some(StorageStatus::Working));
    }

    #[tokio::test]
    async fn create_contains_panic_as_error_status() {
        let registry = StorageRegistry::new(Arc::new(HookBus::new()));
        let backend: Arc<dyn StorageBackend> = Arc::new(StubBackend {
            id: "panics".into(),
            fails_init: false,
            reference_target: None,
            caps: StorageCapabilities::read_only(),
            cfg: StorageConfig::default(),
            addition: Value::Null,
        });

        struct Panicking(Arc<dyn StorageBackend>);
        #[async_trait]
        impl StorageBackend for Panicking {
            fn id(&self) -> &str { self.0.id() }
            fn display_name(&self) -> &str { self.0.display_name() }
            fn capabilities(&self) -> &StorageCapabilities { self.0.capabilities() }
            fn storage_config(&self) -> &StorageConfig { self.0.storage_config() }
            fn addition(&self) -> &Value { self.0.addition() }
            async fn init(&self) -> CfkResult<()> { panic!("init exploded") }
            async fn list(&self, path: &VirtualPath, o: &ListOptions) -> CfkResult<DirectoryListing> { self.0.list(path, o).await }
            async fn link(&self, p: &VirtualPath, o: &ReadOptions) -> CfkResult<Link> { self.0.link(p, o).await }
        }

        registry.create(VirtualPath::new("/p"), Arc::new(Panicking(backend)), 0, String::new()).await.unwrap();
        assert!(matches!(registry.status("/p").await, Some(StorageStatus::Error(_))));
    }

    #[tokio::test]
    async fn reference_cycle_is_rejected() {
        let registry = StorageRegistry::new(Arc::new(HookBus::new()));

        let mut a = StubBackend {
            id: "a".into(), fails_init: false, reference_target: Some("/b".into()),
            caps: StorageCapabilities::read_only(), cfg: StorageConfig::default(), addition: Value::Null,
        };
        a.reference_target = Some("/b".to_string());
        registry.create(VirtualPath::new("/a"), Arc::new(a), 0, String::new()).await.unwrap();

        let b = StubBackend {
            id: "b".into(), fails_init: false, reference_target: Some("/a".into()),
            caps: StorageCapabilities::read_only(), cfg: StorageConfig::default(), addition: Value::Null,
        };
        let result = registry.create(VirtualPath::new("/b"), Arc::new(b), 0, String::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disable_then_delete_removes_mount() {
        let registry = StorageRegistry::new(Arc::new(HookBus::new()));
        registry.create(VirtualPath::new("/a"), stub("a"), 0, String::new()).await.unwrap();
        registry.disable("/a").await.unwrap();
        assert_eq!(registry.status("/a").await, Some(StorageStatus::Disabled));
        registry.delete("/a").await.unwrap();
        assert_eq!(registry.status("/a").await, None);
    }
}
