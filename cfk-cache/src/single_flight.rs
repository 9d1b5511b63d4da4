//! Per-key in-flight-call coalescing
//!
//! When many callers ask for the same key at once (e.g. ten parallel
//! reads of the same directory listing), only one of them actually
//! runs the fetch; the rest wait on it and share its result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

enum Slot<V> {
    InFlight(Arc<Notify>),
    Done(V),
}

/// Coalesces concurrent fetches of the same key. `V` must be `Clone`
/// since every waiter receives its own copy of the fetched value.
pub struct SingleFlight<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    /// Runs `fetch` for `key` unless another caller is already fetching
    /// it, in which case this call waits for that fetch to finish and
    /// returns its result instead. Errors are not shared: a failed
    /// fetch clears the slot so the next caller retries independently.
    pub async fn run<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            let notify = {
                let mut slots = self.slots.lock().await;
                match slots.get(key) {
                    Some(Slot::Done(value)) => return Ok(value.clone()),
                    Some(Slot::InFlight(notify)) => Some(notify.clone()),
                    None => {
                        slots.insert(key.to_string(), Slot::InFlight(Arc::new(Notify::new())));
                        None
                    }
                }
            };

            let Some(notify) = notify else {
                let result = fetch().await;
                let mut slots = self.slots.lock().await;
                match &result {
                    Ok(value) => {
                        if let Some(Slot::InFlight(notify)) = slots.insert(key.to_string(), Slot::Done(value.clone())) {
                            notify.notify_waiters();
                        }
                    }
                    Err(_) => {
                        if let Some(Slot::InFlight(notify)) = slots.remove(key) {
                            notify.notify_waiters();
                        }
                    }
                }
                return result;
            };

            notify.notified().await;
            // Loop back around: the slot is now either Done (return the
            // shared value) or gone (the prior attempt failed — retry).
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.slots.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_calls_share_one_fetch() {
        let flight: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<u32, String>(42)
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_allows_retry() {
        let flight: SingleFlight<u32> = SingleFlight::new();

        let first = flight.run("k", || async { Err::<u32, String>("boom".into()) }).await;
        assert!(first.is_err());

        let second = flight.run("k", || async { Ok::<u32, String>(7) }).await;
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        assert_eq!(flight.run("k", || async { Ok::<u32, String>(1) }).await.unwrap(), 1);
        flight.invalidate("k").await;
        assert_eq!(flight.run("k", || async { Ok::<u32, String>(2) }).await.unwrap(), 2);
    }
}
