//! In-flight request registry
//!
//! Collapses concurrent calls for the same key into one execution. The first
//! caller for a key becomes the leader and its future is shared with every
//! caller that arrives before it completes. The entry is removed by the
//! shared future itself, so a cancelled leader does not strand followers.

use crate::errors::{Result, RouteplaneError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

type SharedResult<T> = std::result::Result<T, Arc<RouteplaneError>>;
type SharedFlight<T> = Shared<BoxFuture<'static, SharedResult<T>>>;

/// Whether a caller started the work or joined work already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Registry of pending operations keyed by `K`.
pub struct InFlight<K, T> {
    pending: Arc<Mutex<HashMap<K, SharedFlight<T>>>>,
}

impl<K, T> InFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `make()` unless an operation for `key` is already pending, in
    /// which case wait for that one. Every caller gets the same result;
    /// errors are wrapped in [`RouteplaneError::Shared`].
    pub async fn run<F, Fut>(&self, key: K, make: F) -> (Result<T>, Role)
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (flight, role) = {
            let mut pending = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            match pending.get(&key) {
                Some(existing) => (existing.clone(), Role::Follower),
                None => {
                    let registry = Arc::clone(&self.pending);
                    let cleanup_key = key.clone();
                    let work = make();
                    let flight = async move {
                        let result = work.await.map_err(Arc::new);
                        let mut pending = match registry.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        pending.remove(&cleanup_key);
                        result
                    }
                    .boxed()
                    .shared();
                    pending.insert(key, flight.clone());
                    (flight, Role::Leader)
                }
            }
        };

        (flight.await.map_err(RouteplaneError::Shared), role)
    }

    /// Number of operations currently pending.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for InFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for InFlight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}
