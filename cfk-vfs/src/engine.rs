//! The `Engine`: the façade's central struct.
//!
//! Replaces the donor's scattered globals with one owner for the
//! registry, resolver, cache, hook bus, and task manager, per the
//! "explicit state, no statics" redesign. Every façade operation is a
//! method here; cross-backend transfer work is farmed out to
//! `crate::transfer`, archive browsing to `crate::archive_ops`.

use cfk_archive::ArchivePipeline;
use cfk_cache::{CacheEngine, CacheError};
use cfk_core::operations::{DeleteOptions, ListOptions, ReadOptions, WriteOptions};
use cfk_core::{ByteStream, CfkError, CfkResult, Entry, Link, Metadata, MutationResult, StorageBackend, VirtualPath};
use cfk_hooks::HookBus;
use cfk_registry::StorageRegistry;
use cfk_resolver::{ResolvedPath, Resolver};
use cfk_transfer::{TaskManager, TaskManagerConfig};
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub type TaskId = u64;

pub(crate) fn cache_err(e: CacheError) -> CfkError {
    match e {
        CacheError::Upstream(inner) => inner,
        other => CfkError::Cache(other.to_string()),
    }
}

pub struct EngineConfig {
    pub workers: usize,
    pub stream_cache_dir: PathBuf,
    pub hide_pattern: Option<regex::Regex>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { workers: 4, stream_cache_dir: std::env::temp_dir().join("cfk-stream-cache"), hide_pattern: None }
    }
}

/// Owns every subsystem the façade operations route through. Built
/// once per process (or per test), shared behind an `Arc` so transfer
/// task runners can hold a reference back into it.
pub struct Engine {
    pub registry: Arc<StorageRegistry>,
    pub resolver: Arc<Resolver>,
    pub cache: Arc<CacheEngine>,
    pub hooks: Arc<HookBus>,
    pub tasks: TaskManager,
    pub(crate) archive: ArchivePipeline,
    stream_cache_dir: PathBuf,
}

impl Engine {
    pub async fn new(db: &sled::Db, config: EngineConfig) -> CfkResult<Arc<Self>> {
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(StorageRegistry::new(hooks.clone()));
        let resolver = Resolver::with_hide_pattern(registry.clone(), &hooks, config.hide_pattern);
        hooks.on_storage_lifecycle(resolver.invalidation_hook()).await;

        let cache = Arc::new(CacheEngine::open(db).map_err(cache_err)?);
        let (tasks, _worker_handles) = TaskManager::start(TaskManagerConfig { workers: config.workers });

        tokio::fs::create_dir_all(&config.stream_cache_dir).await.map_err(CfkError::Io)?;

        Ok(Arc::new(Self {
            registry,
            resolver,
            cache,
            hooks,
            tasks,
            archive: ArchivePipeline::new(),
            stream_cache_dir: config.stream_cache_dir,
        }))
    }

    pub fn stream_cache_dir(&self) -> PathBuf {
        self.stream_cache_dir.clone()
    }

    pub async fn mount(&self, mount_path: VirtualPath, backend: Arc<dyn StorageBackend>, order: i32, remark: String) -> CfkResult<()> {
        self.registry.create(mount_path, backend, order, remark).await
    }

    pub(crate) async fn resolve(&self, path: &VirtualPath) -> CfkResult<(ResolvedPath, Arc<dyn StorageBackend>)> {
        let resolved = self.resolver.resolve(path).await?;
        let backend = self
            .registry
            .get(&resolved.backend_key)
            .await
            .ok_or_else(|| CfkError::StorageNotFound(resolved.backend_key.clone()))?;
        Ok((resolved, backend))
    }

    pub(crate) async fn ensure_working(&self, resolved: &ResolvedPath, backend: &Arc<dyn StorageBackend>) -> CfkResult<()> {
        if backend.storage_config().check_status && !self.registry.is_working(&resolved.backend_key).await {
            return Err(CfkError::StorageNotFound(format!("{} is not in working state", resolved.backend_key)));
        }
        Ok(())
    }

    fn listing_key(resolved: &ResolvedPath) -> String {
        format!("{}:{}", resolved.backend_key, resolved.actual_path.to_path_string())
    }

    fn link_key(resolved: &ResolvedPath) -> String {
        format!("link:{}:{}", resolved.backend_key, resolved.actual_path.to_path_string())
    }

    async fn ttl_for(&self, backend_key: &str) -> Option<ChronoDuration> {
        self.registry.cache_expiration_secs(backend_key).await.filter(|secs| *secs > 0).map(ChronoDuration::seconds)
    }

    /// Lists `path`, merging in one-level virtual folders synthesized
    /// from mounts nested below it. Real entries win on name collision.
    pub async fn list(&self, path: &VirtualPath, refresh: bool) -> CfkResult<Vec<Entry>> {
        let virtual_children = self.resolver.virtual_children(path).await;

        let real_entries = match self.resolve(path).await {
            Ok((resolved, backend)) => {
                self.ensure_working(&resolved, &backend).await?;
                let key = Self::listing_key(&resolved);
                if refresh {
                    self.cache.invalidate_listing(&key).await.map_err(cache_err)?;
                }

                let opts = ListOptions::default();
                let listing = if backend.storage_config().no_cache {
                    backend.list(&resolved.actual_path, &opts).await?
                } else {
                    let ttl = self.ttl_for(&resolved.backend_key).await;
                    let backend = backend.clone();
                    let actual = resolved.actual_path.clone();
                    self.cache
                        .listing(&key, ttl, || async move { backend.list(&actual, &opts).await.map_err(CacheError::Upstream) })
                        .await
                        .map_err(cache_err)?
                };
                listing.entries
            }
            Err(e) if e.is_storage_not_found() && !virtual_children.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut by_name: HashMap<String, Entry> =
            real_entries.into_iter().filter_map(|e| e.name().map(|n| (n.to_string(), e))).collect();
        for name in virtual_children {
            by_name.entry(name.clone()).or_insert_with(|| Entry::directory(path.join(&name), Metadata::new()));
        }
        let mut result: Vec<Entry> = by_name.into_values().collect();
        result.sort_by(|a, b| a.name().cmp(&b.name()));

        self.hooks.fire_objects_updated(path).await;
        Ok(result)
    }

    /// Fetches a single entry. Falls back to scanning the parent
    /// listing when the backend doesn't implement `get` directly.
    pub async fn get(&self, path: &VirtualPath, refresh: bool) -> CfkResult<Entry> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;

        match backend.get(&resolved.actual_path).await {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_not_support() || e.is_not_implement() => {
                let parent = path.parent().unwrap_or_else(VirtualPath::root);
                let name = path.name().ok_or_else(|| CfkError::ObjectNotFound(path.to_path_string()))?;
                let entries = self.list(&parent, refresh).await?;
                entries.into_iter().find(|e| e.name() == Some(name)).ok_or_else(|| CfkError::ObjectNotFound(path.to_path_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Produces a readable `Link` for a file, cached and re-fetched on
    /// expiry.
    pub async fn link(&self, path: &VirtualPath, options: &ReadOptions) -> CfkResult<(Link, Entry)> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;
        let entry = self.get(path, false).await?;
        if entry.is_directory() {
            return Err(CfkError::NotFile(path.to_path_string()));
        }

        let key = Self::link_key(&resolved);
        let link = self.fetch_link(&key, &resolved, &backend, options).await?;
        if link.is_expired(chrono::Utc::now()) {
            self.cache.invalidate_link(&key).await;
            let link = self.fetch_link(&key, &resolved, &backend, options).await?;
            return Ok((link, entry));
        }
        Ok((link, entry))
    }

    async fn fetch_link(
        &self,
        key: &str,
        resolved: &ResolvedPath,
        backend: &Arc<dyn StorageBackend>,
        options: &ReadOptions,
    ) -> CfkResult<Link> {
        let backend = backend.clone();
        let actual = resolved.actual_path.clone();
        let options = options.clone();
        self.cache
            .link(key, || async move { backend.link(&actual, &options).await.map_err(CacheError::Upstream) })
            .await
            .map_err(cache_err)
    }

    pub(crate) async fn apply_mutation_result(
        &self,
        resolved: &ResolvedPath,
        virtual_path: &VirtualPath,
        result: MutationResult,
        lazy_cache: bool,
    ) -> CfkResult<()> {
        let parent_actual = resolved.actual_path.parent().unwrap_or_else(VirtualPath::root);
        let parent_key = format!("{}:{}", resolved.backend_key, parent_actual.to_path_string());

        match result {
            MutationResult::Entry(entry) => {
                self.cache.patch_listing_entry(&parent_key, entry).await.map_err(cache_err)?;
            }
            MutationResult::Unknown if !lazy_cache => {
                self.cache.invalidate_listing(&parent_key).await.map_err(cache_err)?;
            }
            MutationResult::Unknown => {}
        }

        let virtual_parent = virtual_path.parent().unwrap_or_else(VirtualPath::root);
        self.hooks.fire_objects_updated(&virtual_parent).await;
        Ok(())
    }

    pub async fn make_dir(&self, path: &VirtualPath, lazy_cache: bool) -> CfkResult<()> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;
        let result = backend.make_dir(&resolved.actual_path).await?;
        self.apply_mutation_result(&resolved, path, result, lazy_cache).await
    }

    /// Root can never be removed. Removing an object that's already
    /// gone is treated as success.
    pub async fn remove(&self, path: &VirtualPath) -> CfkResult<()> {
        if path.is_root() {
            return Err(CfkError::PermissionDenied("root cannot be removed".into()));
        }
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;

        match backend.remove(&resolved.actual_path, &DeleteOptions { recursive: true, force: true }).await {
            Ok(()) => {}
            Err(e) if e.is_object_not_found() => {}
            Err(e) => return Err(e),
        }

        let parent_actual = resolved.actual_path.parent().unwrap_or_else(VirtualPath::root);
        let parent_key = format!("{}:{}", resolved.backend_key, parent_actual.to_path_string());
        self.cache.patch_listing_remove(&parent_key, &resolved.actual_path).await.map_err(cache_err)?;
        self.cache.invalidate_link(&Self::link_key(&resolved)).await;

        let virtual_parent = path.parent().unwrap_or_else(VirtualPath::root);
        self.hooks.fire_objects_updated(&virtual_parent).await;
        Ok(())
    }

    pub async fn rename(&self, path: &VirtualPath, new_name: &str, lazy_cache: bool) -> CfkResult<()> {
        let (resolved, backend) = self.resolve(path).await?;
        self.ensure_working(&resolved, &backend).await?;
        let result = backend.rename(&resolved.actual_path, new_name).await?;

        let parent_actual = resolved.actual_path.parent().unwrap_or_else(VirtualPath::root);
        let parent_key = format!("{}:{}", resolved.backend_key, parent_actual.to_path_string());
        self.cache.patch_listing_remove(&parent_key, &resolved.actual_path).await.map_err(cache_err)?;

        self.apply_mutation_result(&resolved, path, result, lazy_cache).await
    }

    /// Puts a byte stream at `dst_dir/name`. Zero-size existing targets
    /// are replaced outright; a `no_overwrite_upload` mount instead
    /// renames the existing object to a tombstone, uploads, and rolls
    /// the tombstone back on failure.
    pub async fn put(
        &self,
        dst_dir: &VirtualPath,
        name: &str,
        stream: ByteStream,
        size_hint: Option<u64>,
        lazy_cache: bool,
    ) -> CfkResult<Entry> {
        let dst_path = dst_dir.join(name);
        let (resolved, backend) = self.resolve(&dst_path).await?;
        self.ensure_working(&resolved, &backend).await?;
        if backend.storage_config().no_upload {
            return Err(CfkError::UploadNotSupported(resolved.backend_key.clone()));
        }

        let existing = backend.get(&resolved.actual_path).await.ok();
        let options = WriteOptions { overwrite: true, create_parents: true, ..Default::default() };

        if let Some(existing) = &existing {
            if existing.size() == Some(0) {
                backend.remove(&resolved.actual_path, &DeleteOptions::default()).await.ok();
            } else if backend.storage_config().no_overwrite_upload {
                let tombstone_name = format!("{name}.tombstone");
                let tombstone_actual = resolved.actual_path.parent().unwrap_or_else(VirtualPath::root).join(&tombstone_name);
                backend.rename(&resolved.actual_path, &tombstone_name).await?;

                return match backend.put(&resolved.actual_path, stream, size_hint, &options).await {
                    Ok(result) => {
                        backend.remove(&tombstone_actual, &DeleteOptions::default()).await.ok();
                        self.apply_mutation_result(&resolved, &dst_path, result, lazy_cache).await?;
                        self.get(&dst_path, true).await
                    }
                    Err(e) => {
                        backend.rename(&tombstone_actual, name).await.ok();
                        Err(e)
                    }
                };
            }
        }

        let result = backend.put(&resolved.actual_path, stream, size_hint, &options).await?;
        self.apply_mutation_result(&resolved, &dst_path, result, lazy_cache).await?;
        self.get(&dst_path, true).await
    }

    pub async fn put_url(&self, dst_dir: &VirtualPath, name: &str, url: &str, headers: HashMap<String, String>) -> CfkResult<Entry> {
        let dst_path = dst_dir.join(name);
        let (resolved, backend) = self.resolve(&dst_path).await?;
        self.ensure_working(&resolved, &backend).await?;
        if !backend.capabilities().put_url {
            return Err(CfkError::NotSupport("put_url".into()));
        }
        let result = backend.put_url(&resolved.actual_path, url, headers).await?;
        self.apply_mutation_result(&resolved, &dst_path, result, false).await?;
        self.get(&dst_path, true).await
    }

    /// Backend-specific escape hatch; args/return are an opaque JSON
    /// blob the façade never interprets.
    pub async fn other(&self, path: &VirtualPath, method: &str, args: serde_json::Value) -> CfkResult<serde_json::Value> {
        let (_, backend) = self.resolve(path).await?;
        backend.other(method, args).await
    }

    pub async fn get_space_info(&self, path: &VirtualPath) -> CfkResult<cfk_core::SpaceInfo> {
        let (_, backend) = self.resolve(path).await?;
        backend.get_space_info().await
    }
}
