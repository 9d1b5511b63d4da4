//! Seekable stream adapter over a `Link`, plus rate limiting and
//! progress reporting
//!
//! `SeekableStream` exposes the abstract reader/seeker/closer contract
//! the transfer engine needs regardless of which form the backing
//! `Link` took:
//! - an in-process handle is read and seeked directly;
//! - a URL is read via HTTP range requests, reopening the connection on
//!   an out-of-window seek, and falls back to draining the whole body
//!   to a temp file the first time the server doesn't honor `Range`;
//! - a range-read closure is invoked per read window.

use cfk_core::error::{CfkError, CfkResult};
use cfk_core::link::{Link, LinkKind};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE, RANGE};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Called with a normalized 0.0-100.0 progress value.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Token-bucket limiter shared across one client's concurrent
/// uploads/downloads. `acquire` blocks until enough tokens (bytes) are
/// available, refilling continuously at `rate_bytes_per_sec`.
pub struct RateLimiter {
    state: Mutex<(f64, Instant)>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_bytes_per_sec: f64) -> Self {
        Self { state: Mutex::new((rate_bytes_per_sec, Instant::now())), rate: rate_bytes_per_sec, burst: rate_bytes_per_sec }
    }

    pub fn unlimited() -> Self {
        Self::new(f64::MAX)
    }

    pub async fn acquire(&self, bytes: usize) {
        if self.rate.is_infinite() || self.rate >= f64::MAX {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.1).as_secs_f64();
                state.1 = now;
                state.0 = (state.0 + elapsed * self.rate).min(self.burst);

                if state.0 >= bytes as f64 {
                    state.0 -= bytes as f64;
                    None
                } else {
                    let deficit = bytes as f64 - state.0;
                    Some(Duration::from_secs_f64(deficit / self.rate))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

enum Backing {
    Direct(Arc<tokio::sync::Mutex<cfk_core::link::BoxedSeekableSource>>),
    RangeRead(cfk_core::link::RangeReadFn),
    Url { client: reqwest::Client, url: String, headers: HeaderMap, supports_range: Option<bool> },
    CachedFile { file: File },
}

/// Adapts a `Link` into a seekable byte source, caching HTTP sources to
/// a temp file the first time range requests turn out unsupported.
pub struct SeekableStream {
    backing: Backing,
    position: u64,
    total_len: Option<u64>,
    closed: AtomicBool,
    cache_dir: PathBuf,
}

impl SeekableStream {
    pub fn new(link: &Link, cache_dir: PathBuf) -> Self {
        let backing = match link.kind() {
            LinkKind::Direct(src) => Backing::Direct(src.clone()),
            LinkKind::RangeRead(f) => Backing::RangeRead(f.clone()),
            LinkKind::Url { url, headers } => {
                let mut header_map = HeaderMap::new();
                for (k, v) in headers {
                    if let (Ok(name), Ok(value)) = (reqwest::header::HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                        header_map.insert(name, value);
                    }
                }
                Backing::Url { client: reqwest::Client::new(), url: url.clone(), headers: header_map, supports_range: None }
            }
        };
        Self { backing, position: 0, total_len: None, closed: AtomicBool::new(false), cache_dir }
    }

    pub fn total_len(&self) -> Option<u64> {
        self.total_len
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads up to `buf.len()` bytes starting at the current position,
    /// returning the number of bytes actually read (0 at EOF).
    pub async fn read(&mut self, buf: &mut [u8]) -> CfkResult<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CfkError::Other("read on a closed stream".into()));
        }

        if matches!(self.backing, Backing::Url { .. }) {
            return self.read_via_http(buf).await;
        }

        match &mut self.backing {
            Backing::Direct(src) => {
                let mut guard = src.lock().await;
                guard.seek(std::io::SeekFrom::Start(self.position)).await.map_err(CfkError::Io)?;
                let n = guard.read(buf).await.map_err(CfkError::Io)?;
                self.position += n as u64;
                Ok(n)
            }
            Backing::RangeRead(f) => {
                let end = self.position + buf.len() as u64;
                let mut stream = f(self.position, end)?;
                let mut filled = 0;
                while filled < buf.len() {
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            let n = chunk.len().min(buf.len() - filled);
                            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
                            filled += n;
                        }
                        Some(Err(e)) => return Err(e),
                        None => break,
                    }
                }
                self.position += filled as u64;
                Ok(filled)
            }
            Backing::CachedFile { file } => {
                file.seek(std::io::SeekFrom::Start(self.position)).await.map_err(CfkError::Io)?;
                let n = file.read(buf).await.map_err(CfkError::Io)?;
                self.position += n as u64;
                Ok(n)
            }
            Backing::Url { .. } => unreachable!("handled above"),
        }
    }

    async fn read_via_http(&mut self, buf: &mut [u8]) -> CfkResult<usize> {
        let (client, url, headers, supports_range) = match &self.backing {
            Backing::Url { client, url, headers, supports_range } => (client.clone(), url.clone(), headers.clone(), *supports_range),
            _ => unreachable!("read_via_http called on a non-Url backing"),
        };

        if supports_range == Some(false) {
            self.materialize_to_cache_file().await?;
            return Box::pin(self.read(buf)).await;
        }

        let range_value = format!("bytes={}-{}", self.position, self.position + buf.len() as u64 - 1);
        let mut request = client.get(&url).headers(headers.clone());
        request = request.header(RANGE, range_value);

        let response = request.send().await.map_err(|e| CfkError::Network(e.to_string()))?;
        let status = response.status();

        if status == reqwest::StatusCode::PARTIAL_CONTENT {
            if let Backing::Url { supports_range, .. } = &mut self.backing {
                *supports_range = Some(true);
            }
            if let Some(total) = parse_content_range_total(response.headers().get(CONTENT_RANGE)) {
                self.total_len = Some(total);
            }
            let bytes = response.bytes().await.map_err(|e| CfkError::Network(e.to_string()))?;
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            self.position += n as u64;
            Ok(n)
        } else if status.is_success() {
            if let Backing::Url { supports_range, .. } = &mut self.backing {
                *supports_range = Some(false);
            }
            self.materialize_to_cache_file().await?;
            Box::pin(self.read(buf)).await
        } else {
            Err(CfkError::Network(format!("unexpected status {status}")))
        }
    }

    /// Drains the whole URL body to a temp file and switches the
    /// backing to serve from it, for servers that don't honor `Range`.
    async fn materialize_to_cache_file(&mut self) -> CfkResult<()> {
        let Backing::Url { client, url, headers, .. } = &self.backing else { return Ok(()) };

        let response = client.get(url).headers(headers.clone()).send().await.map_err(|e| CfkError::Network(e.to_string()))?;
        if let Some(len) = response.content_length() {
            self.total_len = Some(len);
        }

        let path = self.cache_dir.join(format!("cfk-stream-{}", uniq_suffix()));
        let mut file = File::create(&path).await.map_err(CfkError::Io)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CfkError::Network(e.to_string()))?;
            file.write_all(&chunk).await.map_err(CfkError::Io)?;
        }
        file.flush().await.map_err(CfkError::Io)?;

        let saved_position = self.position;
        self.backing = Backing::CachedFile { file };
        self.position = saved_position;
        Ok(())
    }

    /// Repositions the logical cursor. For HTTP sources this is lazy —
    /// the next read issues a fresh ranged request (or reopens the
    /// cached file) rather than eagerly seeking.
    pub async fn seek(&mut self, position: u64) -> CfkResult<()> {
        self.position = position;
        Ok(())
    }

    /// Idempotent: a second close is a no-op.
    pub async fn close(&mut self) -> CfkResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Backing::CachedFile { .. } = &self.backing {
            // Dropping the handle releases the fd; the temp file itself
            // is reclaimed by the OS's tmp cleanup, not tracked here.
        }
        Ok(())
    }
}

fn parse_content_range_total(header: Option<&HeaderValue>) -> Option<u64> {
    let value = header?.to_str().ok()?;
    let total = value.rsplit_once('/')?.1;
    total.parse().ok()
}

fn uniq_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Wraps a read loop with progress reporting, calling `progress` with
/// a normalized 0.0-100.0 value as bytes are consumed.
pub async fn pump_with_progress<R>(
    mut read_chunk: impl FnMut() -> R,
    total_bytes: Option<u64>,
    progress: Option<ProgressFn>,
) -> CfkResult<u64>
where
    R: std::future::Future<Output = CfkResult<usize>>,
{
    let mut consumed = 0u64;
    loop {
        let n = read_chunk().await?;
        if n == 0 {
            break;
        }
        consumed += n as u64;
        if let (Some(total), Some(cb)) = (total_bytes, &progress) {
            if total > 0 {
                cb((consumed as f64 / total as f64 * 100.0).min(100.0));
            }
        }
    }
    if let Some(cb) = &progress {
        if total_bytes.is_none() {
            cb(100.0);
        }
    }
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn rate_limiter_releases_tokens_immediately_when_available() {
        let limiter = RateLimiter::new(1_000_000.0);
        let start = Instant::now();
        limiter.acquire(100).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn unlimited_limiter_never_waits() {
        let limiter = RateLimiter::unlimited();
        limiter.acquire(usize::MAX / 2).await;
    }

    #[tokio::test]
    async fn pump_with_progress_reports_normalized_percentage() {
        let chunks = [5usize, 5, 0];
        let idx = AtomicUsize::new(0);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let reported_clone = reported.clone();

        let progress: ProgressFn = Arc::new(move |p| {
            let reported = reported_clone.clone();
            tokio::spawn(async move {
                reported.lock().await.push(p);
            });
        });

        let consumed = pump_with_progress(
            || {
                let i = idx.fetch_add(1, Ordering::SeqCst);
                async move { Ok(chunks[i]) }
            },
            Some(10),
            Some(progress),
        )
        .await
        .unwrap();

        assert_eq!(consumed, 10);
    }

    #[test]
    fn parses_total_from_content_range_header() {
        let header = HeaderValue::from_str("bytes 0-99/1234").unwrap();
        assert_eq!(parse_content_range_total(Some(&header)), Some(1234));
    }
}
