use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    db_types::{CachedWebhookContext, OrderCode, OrderSnapshot},
    fallback::lru::LruCache,
    traits::KeyValueStore,
};

pub const WEBHOOK_CONTEXT_PREFIX: &str = "webhook:";
pub const ORDER_SNAPSHOT_PREFIX: &str = "fallback:order:";
pub const CALLBACK_SENT_PREFIX: &str = "fallback:callback:sent:";

pub fn webhook_context_key(code: &OrderCode) -> String {
    format!("{WEBHOOK_CONTEXT_PREFIX}{code}")
}

pub fn order_snapshot_key(code: &OrderCode) -> String {
    format!("{ORDER_SNAPSHOT_PREFIX}{code}")
}

pub fn callback_sent_key(code: &OrderCode) -> String {
    format!("{CALLBACK_SENT_PREFIX}{code}")
}

#[derive(Debug, Clone)]
pub struct FallbackCacheConfig {
    pub capacity: usize,
    pub default_ttl: Duration,
}

impl Default for FallbackCacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000, default_ttl: Duration::from_secs(24 * 60 * 60) }
    }
}

/// The result of a cache lookup.
///
/// `Unknown` covers both "never cached" and "could not tell because the persistent tier failed". Callers must treat it
/// as "no information", never as "the order does not exist".
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Unknown,
}

impl<T> CacheLookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Self::Hit(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    expires_at: DateTime<Utc>,
    value: serde_json::Value,
}

impl CacheEnvelope {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { expires_at, value }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A two-tier cache of webhook contexts, order snapshots and delivery flags.
///
/// Reads hit a bounded in-process LRU first, then the persistent [`KeyValueStore`]; persistent hits are copied back
/// into the LRU. Writes go to both tiers. The persistent tier is optional, and its failures are logged and swallowed:
/// this cache exists to keep things running while other systems fail, so it must never be the thing that fails.
pub struct FallbackCacheStore<K> {
    memory: Arc<Mutex<LruCache<String, CacheEnvelope>>>,
    persistent: Option<K>,
    config: FallbackCacheConfig,
}

impl<K: Clone> Clone for FallbackCacheStore<K> {
    fn clone(&self) -> Self {
        Self { memory: Arc::clone(&self.memory), persistent: self.persistent.clone(), config: self.config.clone() }
    }
}

impl<K: KeyValueStore> FallbackCacheStore<K> {
    pub fn new(persistent: Option<K>, config: FallbackCacheConfig) -> Self {
        if persistent.is_none() {
            warn!("🧊️ No persistent fallback store configured. Cached webhook contexts will not survive a restart");
        }
        let memory = Arc::new(Mutex::new(LruCache::new(config.capacity)));
        Self { memory, persistent, config }
    }

    pub fn config(&self) -> &FallbackCacheConfig {
        &self.config
    }

    fn memory(&self) -> MutexGuard<'_, LruCache<String, CacheEnvelope>> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    //----------------------------------------   Raw access   ---------------------------------------------------------

    async fn put_value(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let envelope = CacheEnvelope::new(value, ttl);
        if let Some(evicted) = self.memory().put(key.to_string(), envelope.clone()) {
            trace!("🧊️ Evicted {evicted} from the in-memory tier");
        }
        if let Some(store) = &self.persistent {
            let serialized = match serde_json::to_string(&envelope) {
                Ok(s) => s,
                Err(e) => {
                    error!("🧊️ Could not serialize {key} for the persistent tier: {e}");
                    return;
                },
            };
            if let Err(e) = store.set(key, &serialized, ttl).await {
                warn!("🧊️ Could not write {key} to the persistent tier: {e}");
            }
        }
    }

    async fn get_value(&self, key: &str) -> CacheLookup<serde_json::Value> {
        {
            let key = key.to_string();
            let mut memory = self.memory();
            let cached = memory.get(&key).map(|e| (!e.is_expired()).then(|| e.value.clone()));
            match cached {
                Some(Some(value)) => return CacheLookup::Hit(value),
                Some(None) => {
                    memory.remove(&key);
                },
                None => {},
            }
        }
        let Some(store) = &self.persistent else { return CacheLookup::Unknown };
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Unknown,
            Err(e) => {
                warn!("🧊️ Could not read {key} from the persistent tier: {e}");
                return CacheLookup::Unknown;
            },
        };
        let envelope = match serde_json::from_str::<CacheEnvelope>(&raw) {
            Ok(e) if !e.is_expired() => e,
            Ok(_) => return CacheLookup::Unknown,
            Err(e) => {
                warn!("🧊️ Discarding unreadable persistent entry {key}: {e}");
                return CacheLookup::Unknown;
            },
        };
        trace!("🧊️ {key} found in the persistent tier with {:?} left", envelope.remaining());
        let value = envelope.value.clone();
        self.memory().put(key.to_string(), envelope);
        CacheLookup::Hit(value)
    }

    async fn delete_value(&self, key: &str) {
        self.memory().remove(&key.to_string());
        if let Some(store) = &self.persistent {
            if let Err(e) = store.delete(key).await {
                warn!("🧊️ Could not delete {key} from the persistent tier: {e}");
            }
        }
    }

    async fn put_typed<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(v) => self.put_value(key, v, ttl).await,
            Err(e) => error!("🧊️ Could not serialize {key}: {e}"),
        }
    }

    async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        match self.get_value(key).await {
            CacheLookup::Hit(v) => match serde_json::from_value(v) {
                Ok(t) => CacheLookup::Hit(t),
                Err(e) => {
                    warn!("🧊️ Cached value for {key} has an unexpected shape: {e}");
                    CacheLookup::Unknown
                },
            },
            CacheLookup::Unknown => CacheLookup::Unknown,
        }
    }

    /// True if the key is currently held by the in-process tier.
    pub fn in_memory(&self, key: &str) -> bool {
        self.memory().contains(&key.to_string())
    }

    pub fn memory_len(&self) -> usize {
        self.memory().len()
    }

    /// Drops everything from the in-process tier. The persistent tier is left alone.
    pub fn clear_memory(&self) {
        self.memory().clear();
        info!("🧊️ In-memory fallback tier cleared");
    }

    //----------------------------------------  Webhook contexts  -----------------------------------------------------

    pub async fn put(&self, context: &CachedWebhookContext, ttl: Option<Duration>) {
        let key = webhook_context_key(&context.order_code);
        self.put_typed(&key, context, ttl).await;
        trace!("🧊️ Cached webhook context for {}", context.order_code);
    }

    pub async fn get(&self, code: &OrderCode) -> CacheLookup<CachedWebhookContext> {
        self.get_typed(&webhook_context_key(code)).await
    }

    /// Removes the webhook context and order snapshot. The callback-sent flag is kept until it expires, so a sweep that
    /// runs later can still reconcile it with the store.
    pub async fn delete(&self, code: &OrderCode) {
        self.delete_value(&webhook_context_key(code)).await;
        self.delete_value(&order_snapshot_key(code)).await;
    }

    //----------------------------------------  Order snapshots   -----------------------------------------------------

    pub async fn put_order_snapshot(&self, snapshot: &OrderSnapshot) {
        self.put_typed(&order_snapshot_key(&snapshot.order_code), snapshot, None).await;
    }

    pub async fn get_order_snapshot(&self, code: &OrderCode) -> CacheLookup<OrderSnapshot> {
        self.get_typed(&order_snapshot_key(code)).await
    }

    //----------------------------------------   Delivery flags   -----------------------------------------------------

    /// Records that a callback was delivered while the store could not be told about it.
    pub async fn mark_callback_sent(&self, code: &OrderCode) {
        self.put_typed(&callback_sent_key(code), &Utc::now(), None).await;
    }

    pub async fn is_callback_sent(&self, code: &OrderCode) -> bool {
        self.get_value(&callback_sent_key(code)).await.is_hit()
    }

    pub async fn clear_callback_sent(&self, code: &OrderCode) {
        self.delete_value(&callback_sent_key(code)).await;
    }
}
