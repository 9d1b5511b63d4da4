//! Path resolution: longest-prefix match, replica balancing, and
//! virtual-folder synthesis over the storage registry's mount map.

mod lru;

use cfk_core::{CfkError, CfkResult, VirtualPath};
use cfk_hooks::HookBus;
use cfk_registry::StorageRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const RESOLVE_CACHE_CAPACITY: usize = 300;

/// The resolver's answer: which mounted backend answers for a path,
/// and the path to hand that backend (with the mount prefix removed).
/// Backend identity lives only here — `VirtualPath` itself never
/// carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub backend_key: String,
    pub actual_path: VirtualPath,
}

/// Parse a registry key like `/a/d.balance` or `/a/d.balance2` into its
/// base mount path and replica index (the bare `.balance` form is
/// replica 0).
fn split_balance_suffix(key: &str) -> (&str, Option<u32>) {
    if let Some(start) = key.rfind(".balance") {
        let suffix = &key[start + ".balance".len()..];
        if suffix.is_empty() {
            return (&key[..start], Some(0));
        }
        if let Ok(idx) = suffix.parse::<u32>() {
            return (&key[..start], Some(idx));
        }
    }
    (key, None)
}

struct Cache {
    resolve: lru::LruCache<String, ResolvedPath>,
    virtual_children: lru::LruCache<String, Vec<String>>,
}

/// Resolves `VirtualPath`s against a `StorageRegistry`'s mount map.
pub struct Resolver {
    registry: Arc<StorageRegistry>,
    cache: Mutex<Cache>,
    balance_counters: Mutex<HashMap<String, usize>>,
    hide_pattern: Option<regex::Regex>,
}

impl Resolver {
    /// Builds a resolver and subscribes it to the hook bus so any
    /// storage lifecycle transition drops its cache.
    pub fn new(registry: Arc<StorageRegistry>, hooks: &HookBus) -> Arc<Self> {
        Self::with_hide_pattern(registry, hooks, None)
    }

    pub fn with_hide_pattern(registry: Arc<StorageRegistry>, hooks: &HookBus, hide_pattern: Option<regex::Regex>) -> Arc<Self> {
        let resolver = Arc::new(Self {
            registry,
            cache: Mutex::new(Cache {
                resolve: lru::LruCache::new(RESOLVE_CACHE_CAPACITY),
                virtual_children: lru::LruCache::new(RESOLVE_CACHE_CAPACITY),
            }),
            balance_counters: Mutex::new(HashMap::new()),
            hide_pattern,
        });

        // HookBus only accepts blocking register calls asynchronously;
        // callers register this resolver's invalidation hook
        // themselves via `invalidation_hook()` since `new` cannot
        // `.await` here.
        resolver
    }

    /// A lifecycle hook that clears this resolver's cache; register it
    /// with the same `HookBus` passed to `new` via
    /// `hooks.on_storage_lifecycle(resolver.invalidation_hook()).await`.
    pub fn invalidation_hook(self: &Arc<Self>) -> Arc<dyn Fn(&cfk_hooks::StorageLifecycleEvent) + Send + Sync> {
        let this = self.clone();
        Arc::new(move |_event| this.invalidate())
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.resolve.clear();
        cache.virtual_children.clear();
    }

    /// Resolve `path` to a specific mounted backend, picking a replica
    /// round-robin if more than one is registered at that mount.
    pub async fn resolve(&self, path: &VirtualPath) -> CfkResult<ResolvedPath> {
        let cache_key = path.to_path_string();
        if let Some(hit) = self.cache.lock().unwrap().resolve.get(&cache_key) {
            return Ok(hit.clone());
        }

        let mount_paths = self.registry.mount_paths().await;

        // Group replicas by base mount path.
        let mut bases: HashMap<String, Vec<String>> = HashMap::new();
        for key in &mount_paths {
            let (base, _) = split_balance_suffix(key);
            bases.entry(base.to_string()).or_default().push(key.clone());
        }

        let mut best: Option<&String> = None;
        let mut best_depth = 0usize;
        for base in bases.keys() {
            let base_vp = VirtualPath::new(base.as_str());
            if path.starts_with(&base_vp) && base_vp.depth() >= best_depth {
                best = Some(base);
                best_depth = base_vp.depth();
            }
        }

        let base = best.ok_or_else(|| CfkError::StorageNotFound(path.to_path_string()))?;
        let replicas = &bases[base];
        let chosen_key = if replicas.len() == 1 {
            replicas[0].clone()
        } else {
            let mut counters = self.balance_counters.lock().unwrap();
            let counter = counters.entry(base.clone()).or_insert(0);
            let pick = replicas[*counter % replicas.len()].clone();
            *counter = (*counter + 1) % replicas.len();
            pick
        };

        let base_vp = VirtualPath::new(base.as_str());
        let actual_path = path.strip_prefix(&base_vp).unwrap_or_else(VirtualPath::root);

        let resolved = ResolvedPath { backend_key: chosen_key, actual_path };
        self.cache.lock().unwrap().resolve.put(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// One-level-deep synthetic folder names for mounts strictly below
    /// `path`, for the façade to merge with a real listing (real
    /// entries win on name collision). Applies the optional hide
    /// pattern last.
    pub async fn virtual_children(&self, path: &VirtualPath) -> Vec<String> {
        let cache_key = path.to_path_string();
        if let Some(hit) = self.cache.lock().unwrap().virtual_children.get(&cache_key) {
            return hit.clone();
        }

        let mount_paths = self.registry.mount_paths().await;
        let mut names = HashSet::new();
        for key in &mount_paths {
            let (base, _) = split_balance_suffix(key);
            let base_vp = VirtualPath::new(base);
            if base_vp.depth() > path.depth() && base_vp.starts_with(path) {
                if let Some(segment) = base_vp.segments().get(path.depth()) {
                    names.insert(segment.clone());
                }
            }
        }

        let mut result: Vec<String> = match &self.hide_pattern {
            Some(re) => names.into_iter().filter(|n| !re.is_match(n)).collect(),
            None => names.into_iter().collect(),
        };
        result.sort();

        self.cache.lock().unwrap().virtual_children.put(cache_key, result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cfk_core::{ByteStream, DirectoryListing, Link, ListOptions, ReadOptions, StorageBackend, StorageCapabilities, StorageConfig};
    use serde_json::Value;

    struct StubBackend {
        id: String,
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
        async fn init(&self) -> CfkResult<()> { Ok(()) }
        async fn list(&self, path: &VirtualPath, _o: &ListOptions) -> CfkResult<DirectoryListing> {
            Ok(DirectoryListing::new(path.clone(), vec![]))
        }
        async fn link(&self, _path: &VirtualPath, _o: &ReadOptions) -> CfkResult<Link> { unimplemented!() }
    }

    fn stub(id: &str) -> Arc<dyn StorageBackend> {
        Arc::new(StubBackend { id: id.to_string(), caps: StorageCapabilities::read_only(), cfg: StorageConfig::default(), addition: Value::Null })
    }

    #[test]
    fn split_balance_suffix_extracts_index() {
        assert_eq!(split_balance_suffix("/a/d.balance"), ("/a/d", Some(0)));
        assert_eq!(split_balance_suffix("/a/d.balance2"), ("/a/d", Some(2)));
        assert_eq!(split_balance_suffix("/a/d"), ("/a/d", None));
    }

    #[tokio::test]
    async fn resolve_fails_cleanly_with_no_mounts() {
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(StorageRegistry::new(hooks.clone()));
        let resolver = Resolver::new(registry, &hooks);
        let err = resolver.resolve(&VirtualPath::new("/a/b")).await.unwrap_err();
        assert!(err.is_storage_not_found());
    }

    #[tokio::test]
    async fn resolve_picks_longest_matching_mount() {
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(StorageRegistry::new(hooks.clone()));
        registry.create(VirtualPath::new("/"), stub("root"), 0, String::new()).await.unwrap();
        registry.create(VirtualPath::new("/a/d"), stub("d"), 0, String::new()).await.unwrap();

        let resolver = Resolver::new(registry, &hooks);
        let resolved = resolver.resolve(&VirtualPath::new("/a/d/file.txt")).await.unwrap();
        assert_eq!(resolved.backend_key, "/a/d");
        assert_eq!(resolved.actual_path, VirtualPath::new("/file.txt"));
    }

    #[tokio::test]
    async fn resolve_round_robins_balance_replicas() {
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(StorageRegistry::new(hooks.clone()));
        registry.create(VirtualPath::new("/a/d/e.balance"), stub("e0"), 0, String::new()).await.unwrap();
        registry.create(VirtualPath::new("/a/d/e.balance2"), stub("e1"), 0, String::new()).await.unwrap();

        let resolver = Resolver::new(registry, &hooks);
        // Each resolve() call is for a distinct path so the LRU cache
        // doesn't mask the round-robin.
        let r1 = resolver.resolve(&VirtualPath::new("/a/d/e/1.txt")).await.unwrap();
        let r2 = resolver.resolve(&VirtualPath::new("/a/d/e/2.txt")).await.unwrap();
        assert_ne!(r1.backend_key, r2.backend_key);
        assert_eq!(r1.actual_path, VirtualPath::new("/1.txt"));
        assert_eq!(r2.actual_path, VirtualPath::new("/2.txt"));
    }

    #[tokio::test]
    async fn virtual_children_synthesizes_one_level_names() {
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(StorageRegistry::new(hooks.clone()));
        registry.create(VirtualPath::new("/a/b/c"), stub("c"), 0, String::new()).await.unwrap();
        registry.create(VirtualPath::new("/a/x"), stub("x"), 0, String::new()).await.unwrap();

        let resolver = Resolver::new(registry, &hooks);
        let children = resolver.virtual_children(&VirtualPath::new("/a")).await;
        assert_eq!(children, vec!["b".to_string(), "x".to_string()]);
    }
}
