use std::time::Duration;

use bank_gateway_engine::{fallback::SledKeyValueStore, DeliveryApi, SqliteDatabase};
use log::*;
use merchant_tools::WebhookClient;
use tokio::task::JoinHandle;

/// Starts the webhook retry worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_webhook_retry_worker(
    api: DeliveryApi<SqliteDatabase, SledKeyValueStore, WebhookClient>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately. Give the server a moment to settle before the first sweep.
        timer.tick().await;
        info!("📬️ Webhook retry worker started. Sweeping every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            trace!("📬️ Running webhook retry sweep");
            match api.retry_sweep().await {
                Ok(sweep) if sweep.skipped => debug!("📬️ Retry sweep skipped while the store is unavailable"),
                Ok(sweep) => {
                    if sweep.report.failed() > 0 {
                        warn!("📬️ {} of {} retried webhooks failed again", sweep.report.failed(), sweep.candidates);
                    }
                },
                Err(e) => error!("📬️ Error running webhook retry sweep: {e}"),
            }
        }
    })
}
