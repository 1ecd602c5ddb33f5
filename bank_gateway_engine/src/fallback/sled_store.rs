use std::{path::Path, time::Duration};

use chrono::Utc;
use log::*;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec};

use crate::traits::{KeyValueError, KeyValueStore};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at: i64,
    value: String,
}

/// The persistent tier of the fallback cache, backed by an embedded sled database.
///
/// sled has no notion of expiry, so every value is wrapped in an envelope carrying its expiry time. Expired entries
/// read as missing and are removed on the spot; [`SledKeyValueStore::purge_expired`] sweeps the rest.
#[derive(Clone)]
pub struct SledKeyValueStore {
    db: Db,
}

fn db_err(e: sled::Error) -> KeyValueError {
    KeyValueError::Backend(e.to_string())
}

impl SledKeyValueStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KeyValueError> {
        let db = sled::open(path.as_ref()).map_err(db_err)?;
        info!("🧊️ Fallback store opened at {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// An in-memory instance that is thrown away on drop.
    pub fn temporary() -> Result<Self, KeyValueError> {
        let db = sled::Config::new().temporary(true).open().map_err(db_err)?;
        Ok(Self { db })
    }

    fn decode(bytes: &IVec) -> Result<Envelope, KeyValueError> {
        serde_json::from_slice(bytes).map_err(|e| KeyValueError::Serialization(e.to_string()))
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, KeyValueError> {
        let now = Utc::now().timestamp_millis();
        let mut removed = 0;
        for item in self.db.iter() {
            let (key, value) = item.map_err(db_err)?;
            let expired = Self::decode(&value).map(|e| e.expires_at <= now).unwrap_or(true);
            if expired {
                self.db.remove(key).map_err(db_err)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("🧊️ Purged {removed} expired fallback entries");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl KeyValueStore for SledKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KeyValueError> {
        let Some(bytes) = self.db.get(key).map_err(db_err)? else { return Ok(None) };
        let envelope = Self::decode(&bytes)?;
        if envelope.expires_at <= Utc::now().timestamp_millis() {
            trace!("🧊️ {key} has expired");
            self.db.remove(key).map_err(db_err)?;
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KeyValueError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            expires_at: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            value: value.to_string(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| KeyValueError::Serialization(e.to_string()))?;
        self.db.insert(key, IVec::from(bytes)).map_err(db_err)?;
        self.db.flush_async().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KeyValueError> {
        self.db.remove(key).map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = SledKeyValueStore::temporary().unwrap();
        store.set("webhook:ABC", "{\"a\":1}", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("webhook:ABC").await.unwrap().as_deref(), Some("{\"a\":1}"));
        store.delete("webhook:ABC").await.unwrap();
        assert_eq!(store.get("webhook:ABC").await.unwrap(), None);
        // Deleting twice is fine
        store.delete("webhook:ABC").await.unwrap();
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let store = SledKeyValueStore::temporary().unwrap();
        store.set("a", "1", Duration::ZERO).await.unwrap();
        store.set("b", "2", Duration::ZERO).await.unwrap();
        store.set("c", "3", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("3"));
    }
}
