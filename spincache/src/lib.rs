//! In-flight request deduplication with per-call TTL.
//!
//! `RequestCache` coalesces concurrent identical requests into a single
//! shared future: while a lookup for a key is in flight, every other caller
//! for the same key awaits the same future instead of re-invoking the
//! factory. A successful result is kept until its TTL elapses; failures are
//! evicted immediately so the next caller retries.
//!
//! The cache is per-process and string-keyed. Callers are expected to build
//! keys from a query fingerprint (see the `spinsync` crate).
//!
//! # Example
//!
//! ```no_run
//! use spincache::RequestCache;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache: RequestCache<String, std::io::Error> = RequestCache::new();
//!
//!     let value = cache
//!         .resolve("greeting", Duration::from_secs(5), || async {
//!             Ok("hello".to_string())
//!         })
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(value, "hello");
//! }
//! ```

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Shared future type joined by every waiter of an in-flight lookup.
///
/// The error is wrapped in `Arc` so a single failure can be handed to all
/// waiters without requiring `E: Clone`.
type SharedLookup<T, E> = Shared<BoxFuture<'static, Result<T, Arc<E>>>>;

/// Check whether a cached entry has expired at `now`.
///
/// Expiry is an explicit comparison rather than a side effect buried in the
/// lookup path, so TTL behavior can be tested without wall-clock sleeps.
/// An entry with `expires_at == now` is expired; this is what makes a zero
/// TTL legal (the value deduplicates concurrent callers but is never served
/// once resolved).
pub fn is_expired(expires_at: Instant, now: Instant) -> bool {
    now >= expires_at
}

enum Slot<T, E> {
    /// A lookup is running; waiters join this future.
    InFlight(SharedLookup<T, E>),
    /// A resolved value, valid until `expires_at`.
    Ready { value: T, expires_at: Instant },
}

/// String-keyed request cache with in-flight coalescing and per-call TTL.
///
/// Cloning is cheap and all clones share the same entry map. Entry map
/// mutations happen under a single `Mutex`, held only to inspect or swap a
/// slot, never across an `.await`.
pub struct RequestCache<T, E> {
    slots: Arc<Mutex<HashMap<String, Slot<T, E>>>>,
}

impl<T, E> Clone for RequestCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T, E> Default for RequestCache<T, E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T, E> RequestCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve `key`, invoking `factory` at most once per concurrent burst.
    ///
    /// - An unexpired cached value is returned without invoking `factory`.
    /// - If a lookup for `key` is already in flight, the caller awaits it
    ///   and receives the same result (success or failure).
    /// - Otherwise `factory` runs; on success the value is cached until
    ///   `now + ttl`, on failure the slot is evicted so the next call
    ///   retries.
    ///
    /// The winning caller's `ttl` is the one recorded for the entry.
    pub async fn resolve<F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<T, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let lookup = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get(key) {
                Some(Slot::Ready { value, expires_at })
                    if !is_expired(*expires_at, Instant::now()) =>
                {
                    trace!(key, "cache hit");
                    return Ok(value.clone());
                }
                Some(Slot::InFlight(shared)) => {
                    trace!(key, "joining in-flight lookup");
                    shared.clone()
                }
                _ => {
                    debug!(key, "starting lookup");
                    let shared = factory().map(|r| r.map_err(Arc::new)).boxed().shared();
                    slots.insert(key.to_string(), Slot::InFlight(shared.clone()));
                    shared
                }
            }
        };

        let result = lookup.clone().await;

        // Settle the slot. Every waiter runs this; only the one that still
        // sees our in-flight future transitions it, so a newer lookup for
        // the same key is never clobbered.
        let mut slots = self.slots.lock().unwrap();
        if let Some(Slot::InFlight(current)) = slots.get(key) {
            if current.ptr_eq(&lookup) {
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key.to_string(),
                            Slot::Ready {
                                value: value.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        );
                    }
                    Err(_) => {
                        debug!(key, "lookup failed, evicting");
                        slots.remove(key);
                    }
                }
            }
        }

        result
    }

    /// Return the cached value for `key` if present and unexpired, without
    /// triggering or joining a lookup.
    pub fn peek(&self, key: &str) -> Option<T> {
        let slots = self.slots.lock().unwrap();
        match slots.get(key) {
            Some(Slot::Ready { value, expires_at })
                if !is_expired(*expires_at, Instant::now()) =>
            {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Drop the entry for `key`, whether resolved or in flight.
    ///
    /// An in-flight lookup keeps running but its result will not be cached.
    pub fn invalidate(&self, key: &str) {
        self.slots.lock().unwrap().remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    /// Number of entries (resolved and in flight).
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
