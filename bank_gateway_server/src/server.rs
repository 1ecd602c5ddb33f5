use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use bank_gateway_engine::{
    connection::ConnectionManager,
    events::{EventHandlers, EventHooks, EventProducers},
    fallback::{FallbackCacheStore, SledKeyValueStore},
    traits::{KeyValueStore, OrderStore, WebhookTransport},
    DeliveryApi,
    ExpiryApi,
    OrderStatusApi,
    ReconciliationApi,
    SqliteDatabase,
};
use bgw_common::Secret;
use futures::FutureExt;
use log::*;
use merchant_tools::WebhookClient;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    expiry_worker::start_expiry_worker,
    middleware::{AttemptLimiter, CredentialSource, SecretAuthMiddlewareFactory},
    retry_worker::start_webhook_retry_worker,
    routes::{
        health,
        BankTransactionRoute,
        CacheWebhookContextRoute,
        ExpireOrdersRoute,
        OrderStatusRoute,
        PendingWebhooksRoute,
        ReplayBankTransactionRoute,
        ResendByCallbackRoute,
        ResendWebhooksRoute,
        StoreHealthRoute,
        WebhookRetryRoute,
    },
};

/// Header bank portals put their shared secret in.
pub const BANK_SECRET_HEADER: &str = "X-Bank-Secret";
const EVENT_BUFFER_SIZE: usize = 128;
const MAX_DB_CONNECTIONS: u32 = 25;

type ProductionDelivery = DeliveryApi<SqliteDatabase, SledKeyValueStore, WebhookClient>;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let replica = match &config.replica_database_url {
        Some(url) => Some(
            SqliteDatabase::new_with_url(url, MAX_DB_CONNECTIONS)
                .await
                .map_err(|e| ServerError::InitializeError(format!("Could not open the read replica. {e}")))?,
        ),
        None => None,
    };
    let kv = SledKeyValueStore::open(&config.fallback_kv_path)
        .map_err(|e| ServerError::InitializeError(format!("Could not open the fallback cache. {e}")))?;
    let transport =
        WebhookClient::new(config.webhooks.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let conn = ConnectionManager::new(db, replica, config.connection.clone());
    let cache = FallbackCacheStore::new(Some(kv.clone()), config.cache.clone());
    let delivery = DeliveryApi::new(conn.clone(), cache.clone(), transport, config.delivery.clone());

    let hooks = create_event_hooks(delivery.clone());
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    if config.start_workers {
        let expiry = ExpiryApi::new(conn.clone(), producers.clone());
        start_expiry_worker(expiry, Some(kv), config.order_expiry, config.expiry_interval);
        start_webhook_retry_worker(delivery.clone(), config.webhook_retry_interval);
    } else {
        info!("🕰️ Background workers are disabled. Sweeps only run when the cron endpoints are called.");
    }

    let context = ServerContext::new(conn, cache, delivery, producers, config);
    let srv = create_server_instance(context)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Finalized orders go straight to the delivery engine. Unlinked money only needs a human to look at it.
fn create_event_hooks(delivery: ProductionDelivery) -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_order_finalized(move |ev| {
        let delivery = delivery.clone();
        async move {
            let code = ev.order.order_code.clone();
            trace!("📬️ Order {code} finalized as {}. Notifying merchant", ev.order.status);
            let report = delivery.send_notification(&ev.order).await;
            if report.failed() > 0 {
                info!("📬️ Notification for {code} failed. The retry sweep will pick it up.");
            }
        }
        .boxed()
    });
    hooks.on_entry_unlinked(|ev| {
        async move {
            warn!(
                "📬️ Bank entry #{} ({}/{}) needs manual reconciliation. {}",
                ev.entry.id, ev.entry.portal_id, ev.entry.portal_transaction_id, ev.reason
            );
        }
        .boxed()
    });
    hooks
}

/// Everything the HTTP workers need. Each worker builds its own API objects from this, but they all share the
/// connection manager (and so the circuit breaker state), the fallback cache and the failed-attempt limiter.
pub struct ServerContext<B, K, T> {
    pub conn: ConnectionManager<B>,
    pub cache: FallbackCacheStore<K>,
    pub delivery: DeliveryApi<B, K, T>,
    pub producers: EventProducers,
    pub config: ServerConfig,
    pub limiter: AttemptLimiter,
}

impl<B, K: Clone, T> Clone for ServerContext<B, K, T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            cache: self.cache.clone(),
            delivery: self.delivery.clone(),
            producers: self.producers.clone(),
            config: self.config.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<B, K, T> ServerContext<B, K, T>
where
    B: OrderStore + 'static,
    K: KeyValueStore + 'static,
    T: WebhookTransport + 'static,
{
    pub fn new(
        conn: ConnectionManager<B>,
        cache: FallbackCacheStore<K>,
        delivery: DeliveryApi<B, K, T>,
        producers: EventProducers,
        config: ServerConfig,
    ) -> Self {
        let limiter = AttemptLimiter::from_config(&config.auth);
        Self { conn, cache, delivery, producers, config, limiter }
    }

    fn secret_auth(&self, source: CredentialSource, secret: &Secret<String>) -> SecretAuthMiddlewareFactory {
        SecretAuthMiddlewareFactory::new(source, secret.clone(), self.limiter.clone())
            .with_forwarding(self.config.use_x_forwarded_for, self.config.use_forwarded)
    }

    /// Registers the application state and every route.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let auth = &self.config.auth;
        let reconciliation = ReconciliationApi::new(self.conn.clone(), self.producers.clone());
        let expiry = ExpiryApi::new(self.conn.clone(), self.producers.clone());
        let status = OrderStatusApi::new(self.conn.clone(), self.cache.clone());
        cfg.app_data(web::Data::new(self.conn.clone()))
            .app_data(web::Data::new(reconciliation))
            .app_data(web::Data::new(expiry))
            .app_data(web::Data::new(status))
            .app_data(web::Data::new(self.delivery.clone()))
            .app_data(web::Data::new(self.config.clone()))
            .app_data(web::Data::new(auth.clone()));
        let bank_scope = web::scope("/bank")
            .wrap(self.secret_auth(CredentialSource::Header(BANK_SECRET_HEADER.into()), &auth.bank_webhook_secret))
            .service(BankTransactionRoute::<B, K, T>::new())
            .service(ReplayBankTransactionRoute::<B>::new());
        let cron_scope = web::scope("/cron")
            .wrap(self.secret_auth(CredentialSource::Bearer, &auth.cron_secret))
            .service(ExpireOrdersRoute::<B>::new())
            .service(WebhookRetryRoute::<B, K, T>::new());
        let admin_scope = web::scope("/admin")
            .wrap(self.secret_auth(CredentialSource::Bearer, &auth.admin_key))
            .service(PendingWebhooksRoute::<B, K, T>::new())
            .service(ResendWebhooksRoute::<B, K, T>::new())
            .service(ResendByCallbackRoute::<B, K, T>::new())
            .service(CacheWebhookContextRoute::<B, K, T>::new());
        cfg.service(health)
            .service(StoreHealthRoute::<B>::new())
            .service(OrderStatusRoute::<B, K>::new())
            .service(bank_scope)
            .service(cron_scope)
            .service(admin_scope);
    }
}

pub fn create_server_instance(
    context: ServerContext<SqliteDatabase, SledKeyValueStore, WebhookClient>,
) -> Result<Server, ServerError> {
    let host = context.config.host.clone();
    let port = context.config.port;
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bgw::access_log"))
            .configure(|cfg| context.configure(cfg))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
