//! Reference-counted download/read links
//!
//! A `Link` is what `StorageBackend::link` hands back: either a
//! fetchable URL, an in-process seekable source, or a range-read
//! closure. Callers `acquire()` a guard while they hold the link open;
//! the cache layer only evicts a cached link once its refcount drops
//! to zero.

use crate::error::CfkResult;
use crate::ByteStream;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncSeek};

/// An in-process handle that can be read and seeked, used by backends
/// that hold an open file descriptor or similar local resource rather
/// than a fetchable URL.
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

pub type BoxedSeekableSource = std::pin::Pin<Box<dyn SeekableSource>>;

/// A closure that produces a byte stream for an inclusive-exclusive
/// byte range `[start, end)`, used by backends whose only cheap way to
/// serve a range is computing it on demand rather than exposing a
/// handle or URL.
pub type RangeReadFn = Arc<dyn Fn(u64, u64) -> CfkResult<ByteStream> + Send + Sync>;

pub enum LinkKind {
    Url { url: String, headers: HashMap<String, String> },
    Direct(Arc<tokio::sync::Mutex<BoxedSeekableSource>>),
    RangeRead(RangeReadFn),
}

impl std::fmt::Debug for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Url { url, .. } => write!(f, "LinkKind::Url({url})"),
            LinkKind::Direct(_) => write!(f, "LinkKind::Direct(..)"),
            LinkKind::RangeRead(_) => write!(f, "LinkKind::RangeRead(..)"),
        }
    }
}

struct LinkInner {
    kind: LinkKind,
    expires_at: Option<DateTime<Utc>>,
    refcount: AtomicUsize,
}

/// A ref-counted handle to a readable resource, see module docs.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("kind", &self.inner.kind)
            .field("expires_at", &self.inner.expires_at)
            .field("refcount", &self.refcount())
            .finish()
    }
}

impl Link {
    pub fn from_url(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self::from_kind(LinkKind::Url { url: url.into(), headers }, None)
    }

    pub fn from_direct(source: BoxedSeekableSource) -> Self {
        Self::from_kind(LinkKind::Direct(Arc::new(tokio::sync::Mutex::new(source))), None)
    }

    pub fn from_range_read(f: RangeReadFn) -> Self {
        Self::from_kind(LinkKind::RangeRead(f), None)
    }

    fn from_kind(kind: LinkKind, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { inner: Arc::new(LinkInner { kind, expires_at, refcount: AtomicUsize::new(0) }) }
    }

    /// Must be called before the link is shared (i.e. right after
    /// construction) since it rebuilds the inner `Arc`.
    pub fn with_expiry(self, expires_at: DateTime<Utc>) -> Self {
        let kind = match &self.inner.kind {
            LinkKind::Url { url, headers } => LinkKind::Url { url: url.clone(), headers: headers.clone() },
            LinkKind::Direct(src) => LinkKind::Direct(src.clone()),
            LinkKind::RangeRead(f) => LinkKind::RangeRead(f.clone()),
        };
        Self::from_kind(kind, Some(expires_at))
    }

    pub fn kind(&self) -> &LinkKind {
        &self.inner.kind
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.inner.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::SeqCst)
    }

    /// Mark the link in use. Drop the returned guard to release it.
    /// Never fails to acquire on its own; callers that need
    /// retry-on-acquire-failure semantics implement that at the cache
    /// layer (re-fetching a fresh `Link` when the cached one expired).
    pub fn acquire(&self) -> LinkGuard {
        self.inner.refcount.fetch_add(1, Ordering::SeqCst);
        LinkGuard { link: self.clone() }
    }
}

pub struct LinkGuard {
    link: Link,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.link.inner.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_drop_tracks_refcount() {
        let link = Link::from_url("https://example.invalid/f", HashMap::new());
        assert_eq!(link.refcount(), 0);
        let guard = link.acquire();
        assert_eq!(link.refcount(), 1);
        drop(guard);
        assert_eq!(link.refcount(), 0);
    }

    #[test]
    fn expiry_defaults_to_never() {
        let link = Link::from_url("https://example.invalid/f", HashMap::new());
        assert!(!link.is_expired(Utc::now()));
    }
}
