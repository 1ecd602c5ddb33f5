use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use log::trace;
use tokio::sync::OnceCell;

/// Collapses concurrent identical reads into a single backend call.
///
/// The first caller for a key becomes the leader and runs the operation. Callers that arrive with the same key while
/// the leader is still running wait for, and receive a clone of, the leader's result. The key is forgotten as soon as
/// the leader finishes, so later callers always trigger a fresh read. Results are never cached beyond that.
pub struct RequestCoalescer<T> {
    in_flight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self { in_flight: Mutex::new(HashMap::new()) }
    }
}

impl<T: Clone> RequestCoalescer<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<T>>>> {
        // A panic while holding the lock cannot leave the map in a broken state, so poisoning is ignored
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut map = self.lock();
            match map.get(key) {
                Some(cell) => {
                    trace!("🔌️ Joining in-flight request [{key}]");
                    cell.clone()
                },
                None => {
                    let cell = Arc::new(OnceCell::new());
                    map.insert(key.to_string(), cell.clone());
                    cell
                },
            }
        };
        let result = cell.get_or_init(operation).await.clone();
        let mut map = self.lock();
        if map.get(key).map(|c| Arc::ptr_eq(c, &cell)).unwrap_or(false) {
            map.remove(key);
        }
        result
    }

    /// The number of keys with a read currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
