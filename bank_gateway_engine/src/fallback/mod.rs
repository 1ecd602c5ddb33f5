//! # Fallback cache
//!
//! A two-tier cache that lets the gateway keep sending merchant callbacks and answering status queries while the
//! primary store is unreachable. See [`FallbackCacheStore`].
mod cache_store;
mod lru;
mod sled_store;

pub use cache_store::{
    callback_sent_key,
    order_snapshot_key,
    webhook_context_key,
    CacheLookup,
    FallbackCacheConfig,
    FallbackCacheStore,
};
pub use lru::LruCache;
pub use sled_store::SledKeyValueStore;
