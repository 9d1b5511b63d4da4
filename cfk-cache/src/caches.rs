//! The façade's five keyed caches, bundled behind one handle
//!
//! Listing, archive-listing and archive-meta are persisted (sled +
//! memory front) since they're cheap to serialize and worth surviving
//! a restart. Link and extract-link stay in memory only — a `Link` can
//! wrap an open file handle or a closure, neither of which survives a
//! round trip through serde.

use cfk_core::{ArchiveEntry, ArchiveMeta, DirectoryListing, Link};
use chrono::Duration;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::single_flight::SingleFlight;
use crate::ttl_store::TtlStore;
use crate::CacheResult;

const MEMORY_FRONT_CAPACITY: usize = 2_000;

/// In-memory-only store for values that can't be serialized (`Link`).
/// No persistence, no TTL sweep beyond what `Link::is_expired` already
/// tracks — callers check that on read.
struct LinkStore {
    entries: Mutex<HashMap<String, Link>>,
}

impl LinkStore {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    async fn get(&self, key: &str) -> Option<Link> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(link) if !link.is_expired(chrono::Utc::now()) => Some(link.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: &str, link: Link) {
        self.entries.lock().await.insert(key.to_string(), link);
    }

    async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

/// Tracks when a directory's listing was last re-sorted, so the façade
/// can debounce repeated `local_sort` work to at most once per
/// interval even under a burst of mutations.
struct SortDebounce {
    last_sort: StdMutex<HashMap<String, Instant>>,
}

impl SortDebounce {
    fn new() -> Self {
        Self { last_sort: StdMutex::new(HashMap::new()) }
    }

    /// Returns true if a re-sort of `path` is due (and records now as
    /// the last sort time), false if one happened within `interval`.
    fn due(&self, path: &str, interval: std::time::Duration) -> bool {
        let mut last = self.last_sort.lock().expect("sort debounce lock poisoned");
        let now = Instant::now();
        match last.get(path) {
            Some(prev) if now.duration_since(*prev) < interval => false,
            _ => {
                last.insert(path.to_string(), now);
                true
            }
        }
    }

    fn clear(&self, path: &str) {
        self.last_sort.lock().expect("sort debounce lock poisoned").remove(path);
    }
}

/// Default debounce window for per-directory re-sorting after a
/// mutation, per the local-sort cross-cutting rule.
pub const DEFAULT_SORT_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(60);

/// Bundles the five keyed caches the façade reads through, each paired
/// with single-flight coalescing so a burst of concurrent callers
/// asking for the same key only pays for one backend round trip.
pub struct CacheEngine {
    listing: TtlStore<DirectoryListing>,
    listing_flight: SingleFlight<DirectoryListing>,

    archive_listing: TtlStore<Vec<ArchiveEntry>>,
    archive_listing_flight: SingleFlight<Vec<ArchiveEntry>>,

    archive_meta: TtlStore<ArchiveMeta>,
    archive_meta_flight: SingleFlight<ArchiveMeta>,

    link: LinkStore,
    link_flight: SingleFlight<Link>,

    extract_link: LinkStore,
    extract_link_flight: SingleFlight<Link>,

    sort_debounce: SortDebounce,
}

impl CacheEngine {
    pub fn open(db: &sled::Db) -> CacheResult<Self> {
        Ok(Self {
            listing: TtlStore::open(db, "listing", MEMORY_FRONT_CAPACITY)?,
            listing_flight: SingleFlight::new(),
            archive_listing: TtlStore::open(db, "archive_listing", MEMORY_FRONT_CAPACITY)?,
            archive_listing_flight: SingleFlight::new(),
            archive_meta: TtlStore::open(db, "archive_meta", MEMORY_FRONT_CAPACITY)?,
            archive_meta_flight: SingleFlight::new(),
            link: LinkStore::new(),
            link_flight: SingleFlight::new(),
            extract_link: LinkStore::new(),
            extract_link_flight: SingleFlight::new(),
            sort_debounce: SortDebounce::new(),
        })
    }

    pub async fn listing<F, Fut>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> CacheResult<DirectoryListing>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<DirectoryListing>>,
    {
        if let Some(cached) = self.listing.get(key).await? {
            return Ok(cached);
        }
        let store = &self.listing;
        self.listing_flight
            .run(key, || async move {
                let value = fetch().await?;
                store.put(key, value.clone(), ttl).await?;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate_listing(&self, key: &str) -> CacheResult<()> {
        self.listing.invalidate(key).await?;
        self.listing_flight.invalidate(key).await;
        self.sort_debounce.clear(key);
        Ok(())
    }

    pub async fn invalidate_listing_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.listing.invalidate_prefix(prefix).await
    }

    /// Patches a single entry into a cached listing (e.g. after a
    /// backend confirms a rename) instead of invalidating the whole
    /// directory. No-ops if the directory isn't cached.
    pub async fn patch_listing_entry(&self, dir_key: &str, entry: cfk_core::Entry) -> CacheResult<()> {
        let Some(mut listing) = self.listing.get(dir_key).await? else {
            return Ok(());
        };
        if let Some(existing) = listing.entries.iter_mut().find(|e| e.path == entry.path) {
            *existing = entry;
        } else {
            listing.entries.push(entry);
        }
        self.listing.put(dir_key, listing, None).await
    }

    pub async fn patch_listing_remove(&self, dir_key: &str, removed: &cfk_core::VirtualPath) -> CacheResult<()> {
        let Some(mut listing) = self.listing.get(dir_key).await? else {
            return Ok(());
        };
        listing.entries.retain(|e| &e.path != removed);
        self.listing.put(dir_key, listing, None).await
    }

    /// True if `dir_key`'s listing is due for a local re-sort; records
    /// the attempt so repeated mutations within the debounce window
    /// don't each trigger one.
    pub fn sort_due(&self, dir_key: &str) -> bool {
        self.sort_debounce.due(dir_key, DEFAULT_SORT_DEBOUNCE)
    }

    pub async fn archive_listing<F, Fut>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> CacheResult<Vec<ArchiveEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Vec<ArchiveEntry>>>,
    {
        if let Some(cached) = self.archive_listing.get(key).await? {
            return Ok(cached);
        }
        let store = &self.archive_listing;
        self.archive_listing_flight
            .run(key, || async move {
                let value = fetch().await?;
                store.put(key, value.clone(), ttl).await?;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate_archive_listing(&self, key: &str) -> CacheResult<()> {
        self.archive_listing.invalidate(key).await?;
        self.archive_listing_flight.invalidate(key).await;
        Ok(())
    }

    pub async fn archive_meta<F, Fut>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> CacheResult<ArchiveMeta>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<ArchiveMeta>>,
    {
        if let Some(cached) = self.archive_meta.get(key).await? {
            return Ok(cached);
        }
        let store = &self.archive_meta;
        self.archive_meta_flight
            .run(key, || async move {
                let value = fetch().await?;
                store.put(key, value.clone(), ttl).await?;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate_archive_meta(&self, key: &str) -> CacheResult<()> {
        self.archive_meta.invalidate(key).await?;
        self.archive_meta_flight.invalidate(key).await;
        Ok(())
    }

    pub async fn link<F, Fut>(&self, key: &str, fetch: F) -> CacheResult<Link>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Link>>,
    {
        if let Some(cached) = self.link.get(key).await {
            return Ok(cached);
        }
        let store = &self.link;
        self.link_flight
            .run(key, || async move {
                let value = fetch().await?;
                store.put(key, value.clone()).await;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate_link(&self, key: &str) {
        self.link.invalidate(key).await;
        self.link_flight.invalidate(key).await;
    }

    pub async fn extract_link<F, Fut>(&self, key: &str, fetch: F) -> CacheResult<Link>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Link>>,
    {
        if let Some(cached) = self.extract_link.get(key).await {
            return Ok(cached);
        }
        let store = &self.extract_link;
        self.extract_link_flight
            .run(key, || async move {
                let value = fetch().await?;
                store.put(key, value.clone()).await;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate_extract_link(&self, key: &str) {
        self.extract_link.invalidate(key).await;
        self.extract_link_flight.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfk_core::VirtualPath;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn open_engine() -> (tempfile::TempDir, CacheEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let engine = CacheEngine::open(&db).unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn listing_is_cached_after_first_fetch() {
        let (_dir, engine) = open_engine();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = engine
                .listing("/a", Some(Duration::seconds(60)), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(DirectoryListing::new(VirtualPath::new("/a"), vec![]))
                })
                .await
                .unwrap();
            assert_eq!(result.path, VirtualPath::new("/a"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_listing_forces_refetch() {
        let (_dir, engine) = open_engine();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(DirectoryListing::new(VirtualPath::new("/a"), vec![]))
        };

        engine.listing("/a", None, || fetch(calls.clone())).await.unwrap();
        engine.invalidate_listing("/a").await.unwrap();
        engine.listing("/a", None, || fetch(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn patch_listing_entry_updates_in_place() {
        let (_dir, engine) = open_engine();
        let entry = cfk_core::Entry::file(VirtualPath::new("/a/f"), cfk_core::Metadata::new());
        engine
            .listing("/a", None, || async { Ok(DirectoryListing::new(VirtualPath::new("/a"), vec![entry.clone()])) })
            .await
            .unwrap();

        let mut updated = entry.clone();
        updated.display_name = Some("renamed".into());
        engine.patch_listing_entry("/a", updated).await.unwrap();

        let listing = engine.listing("/a", None, || async { panic!("should be cached") }).await.unwrap();
        assert_eq!(listing.entries[0].display_name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn sort_debounce_blocks_immediate_repeat() {
        let (_dir, engine) = open_engine();
        assert!(engine.sort_due("/a"));
        assert!(!engine.sort_due("/a"));
    }

    #[tokio::test]
    async fn link_cache_round_trips() {
        let (_dir, engine) = open_engine();
        let link = engine
            .link("k", || async { Ok(Link::from_url("https://example.com/f", Default::default())) })
            .await
            .unwrap();
        let again = engine.link("k", || async { panic!("should be cached") }).await.unwrap();
        assert_eq!(link.refcount(), again.refcount());
    }
}
