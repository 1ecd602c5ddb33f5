use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::traits::{KeyValueError, KeyValueStore};

/// A [`KeyValueStore`] backed by a hash map. Clones share state. Flip [`MemoryKeyValueStore::set_failing`] to make
/// every call fail.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    values: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryKeyValueStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, (String, DateTime<Utc>)>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), KeyValueError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(KeyValueError::Backend("simulated key-value outage".into()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyValueError> {
        self.check()?;
        let mut values = self.values();
        match values.get(key) {
            Some((_, expires_at)) if *expires_at <= Utc::now() => {
                values.remove(key);
                Ok(None)
            },
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyValueError> {
        self.check()?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.values().insert(key.to_string(), (value.to_string(), Utc::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KeyValueError> {
        self.check()?;
        self.values().remove(key);
        Ok(())
    }
}
