use std::time::Duration;

use bank_gateway_engine::{fallback::SledKeyValueStore, ExpiryApi, SqliteDatabase};
use log::*;
use tokio::task::JoinHandle;

/// Starts the expiry worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Each tick fails orders that have waited longer than `max_age` for payment, and purges expired entries from the
/// persistent tier of the fallback cache.
pub fn start_expiry_worker(
    api: ExpiryApi<SqliteDatabase>,
    kv: Option<SledKeyValueStore>,
    max_age: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Order expiry worker started. Orders expire after {} minutes", max_age.as_secs() / 60);
        loop {
            timer.tick().await;
            trace!("🕰️ Running order expiry job");
            match api.expire_orders(max_age).await {
                Ok(result) if result.skipped => debug!("🕰️ Expiry job skipped while the store is unavailable"),
                Ok(result) => {
                    if !result.expired.is_empty() {
                        info!("🕰️ {} orders expired: {}", result.expired.len(), code_list(&result.expired));
                    }
                    if !result.conflicts.is_empty() {
                        let conflicts = code_list(&result.conflicts);
                        debug!("🕰️ {} orders changed during the sweep: {conflicts}", result.conflicts.len());
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running order expiry job: {e}");
                },
            }
            if let Some(kv) = &kv {
                match kv.purge_expired() {
                    Ok(0) => {},
                    Ok(n) => debug!("🕰️ Purged {n} expired fallback cache entries"),
                    Err(e) => warn!("🕰️ Could not purge the fallback cache. {e}"),
                }
            }
        }
    })
}

fn code_list<T: std::fmt::Display>(codes: &[T]) -> String {
    codes.iter().map(|c| c.to_string()).collect::<Vec<String>>().join(", ")
}
