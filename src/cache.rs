//! TTL cache for compiled outputs with single-flight computation.
//!
//! Each key maps to either a finished value stamped with its completion time
//! or a shared handle on the computation in flight. The computation runs on
//! its own task: a caller that goes away does not cancel it, and everyone
//! waiting on the key receives its result.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::CacheError;

type Flight<V> = Shared<BoxFuture<'static, Result<Arc<V>, CacheError>>>;

enum Slot<V> {
    Ready { value: Arc<V>, stored_at: Instant },
    InFlight(Flight<V>),
}

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh stored value
    Hit,
    /// Computed by this caller
    Miss,
    /// Waited on a computation started by another caller
    Joined,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Joined => "joined",
        }
    }
}

/// Process-scoped cache; construct once and share behind an `Arc`.
pub struct CompilationCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for CompilationCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CompilationCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the value for `key`, computing it with `compute` when absent or
    /// older than `ttl`.
    ///
    /// At most one computation per key runs at a time. A failed computation
    /// leaves the key empty so the next call starts over.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: K,
        ttl: Duration,
        compute: F,
    ) -> Result<(Arc<V>, CacheStatus), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (flight, status) = {
            let mut slots = self.slots.lock();
            let existing = match slots.get(&key) {
                Some(Slot::Ready { value, stored_at }) if stored_at.elapsed() < ttl => {
                    return Ok((Arc::clone(value), CacheStatus::Hit));
                }
                Some(Slot::InFlight(flight)) => match flight.peek() {
                    // finished with nobody left to store it
                    Some(Ok(value)) if ttl > Duration::ZERO => {
                        let value = Arc::clone(value);
                        slots.insert(
                            key,
                            Slot::Ready {
                                value: Arc::clone(&value),
                                stored_at: Instant::now(),
                            },
                        );
                        return Ok((value, CacheStatus::Hit));
                    }
                    Some(_) => None,
                    None => Some(flight.clone()),
                },
                _ => None,
            };

            match existing {
                Some(flight) => (flight, CacheStatus::Joined),
                None => {
                    debug!("Cache miss, starting computation");
                    Self::purge_expired(&mut slots, ttl);
                    let task = tokio::spawn(compute());
                    let flight: Flight<V> = async move {
                        match task.await {
                            Ok(Ok(value)) => Ok(Arc::new(value)),
                            Ok(Err(e)) => Err(CacheError::Compute(e.to_string())),
                            Err(e) => Err(CacheError::Aborted(e.to_string())),
                        }
                    }
                    .boxed()
                    .shared();
                    slots.insert(key.clone(), Slot::InFlight(flight.clone()));
                    (flight, CacheStatus::Miss)
                }
            }
        };

        let result = flight.clone().await;
        self.settle(&key, &flight, &result);
        result.map(|value| (value, status))
    }

    fn purge_expired(slots: &mut HashMap<K, Slot<V>>, ttl: Duration) {
        let before = slots.len();
        slots.retain(|_, slot| {
            !matches!(slot, Slot::Ready { stored_at, .. } if stored_at.elapsed() >= ttl)
        });
        let purged = before - slots.len();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
    }

    /// Replace the in-flight slot for `key` with its outcome, unless another
    /// computation has taken the slot in the meantime.
    fn settle(&self, key: &K, flight: &Flight<V>, result: &Result<Arc<V>, CacheError>) {
        let mut slots = self.slots.lock();
        let ours = matches!(slots.get(key), Some(Slot::InFlight(f)) if f.ptr_eq(flight));
        if !ours {
            return;
        }
        match result {
            Ok(value) => {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        value: Arc::clone(value),
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(_) => {
                slots.remove(key);
            }
        }
    }

    /// Drop every stored value. Computations in flight still finish.
    pub fn invalidate_all(&self) {
        self.slots
            .lock()
            .retain(|_, slot| matches!(slot, Slot::InFlight(_)));
    }

    /// Number of keys with a stored or in-flight value.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
