//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every store and webhook call below is async for this reason.
//!
//! Authentication is not done here. The `/bank`, `/cron` and `/admin` scopes are wrapped in the shared-secret
//! middleware when the server is assembled (see [`crate::server`]).
use actix_web::{get, http::StatusCode, web, HttpResponse, Responder};
use bank_gateway_engine::{
    connection::ConnectionManager,
    db_types::{NewBankTransaction, OrderCode, TransactionDirection},
    helpers::extract_order_code,
    traits::{KeyValueStore, OrderStore, WebhookTransport},
    DeliveryApi,
    ExpiryApi,
    OrderStatusApi,
    ReconciliationApi,
    ReconciliationError,
};
use bgw_common::{helpers::secrets_match, Amount};
use log::*;

use crate::{
    config::{AuthConfig, ServerConfig},
    data_objects::{
        BankTransactionRequest,
        CacheContextRequest,
        JsonResponse,
        ReplayRequest,
        ResendByCallbackRequest,
        ResendRequest,
        DEFAULT_ADMIN_ACTOR,
    },
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

route!(store_health => Get "/health/store" impl OrderStore);
/// Pings the primary store through its circuit breaker and reports the state of every node.
///
/// Responds with 503 while the primary circuit is not closed, so that load balancers can act on it.
pub async fn store_health<B: OrderStore>(conn: web::Data<ConnectionManager<B>>) -> HttpResponse {
    if let Err(e) = conn.ping().await {
        debug!("💻️ Store ping failed. {e}");
    }
    let status = conn.get_health_status();
    let code = if status.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    HttpResponse::build(code).json(status)
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(order_status => Get "/orders/{code}/status" impl OrderStore, KeyValueStore);
pub async fn order_status<B, K>(
    path: web::Path<String>,
    api: web::Data<OrderStatusApi<B, K>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
{
    let code = OrderCode::from(path.into_inner().trim());
    trace!("💻️ GET status for order {code}");
    let status = api.order_status(&code).await?;
    Ok(HttpResponse::Ok().json(status))
}

//----------------------------------------------   Bank  ----------------------------------------------------
route!(bank_transaction => Post "/transactions" impl OrderStore, KeyValueStore, WebhookTransport);
/// Route handler for bank portal transaction notifications.
///
/// Every business outcome (including duplicates and unattributed money) is a 200 with a `ReconcileResult` body, so
/// that portals do not retry them. If the store is unavailable, the payment is settled against the fallback cache when
/// possible, and the portal gets a 503 so that it retries once the store is back.
pub async fn bank_transaction<B, K, T>(
    body: web::Json<BankTransactionRequest>,
    reconciliation: web::Data<ReconciliationApi<B>>,
    delivery: web::Data<DeliveryApi<B, K, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    let tx = NewBankTransaction::try_from(body.into_inner())?;
    debug!("💻️ Bank transaction {}/{} for {}", tx.portal_id, tx.portal_transaction_id, tx.amount);
    match reconciliation.record_bank_transaction(tx.clone()).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(ReconciliationError::StoreError(e)) if e.is_transient() => {
            warn!("💻️ Store is unavailable while recording {}/{}. {e}", tx.portal_id, tx.portal_transaction_id);
            settle_during_outage(delivery.as_ref(), &tx).await;
            Err(e.into())
        },
        Err(e) => Err(e.into()),
    }
}

async fn settle_during_outage<B, K, T>(delivery: &DeliveryApi<B, K, T>, tx: &NewBankTransaction)
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    if tx.direction != TransactionDirection::Credit {
        return;
    }
    let Some(code) = extract_order_code(&tx.description) else {
        return;
    };
    let Ok(paid) = Amount::try_from(tx.amount) else {
        return;
    };
    match delivery.settle_from_cache(&code, paid).await {
        Ok(outcome) => info!("💻️ Fallback settlement of {code}: {outcome:?}"),
        Err(e) => info!("💻️ {code} could not be settled from the fallback cache. {e}"),
    }
}

route!(replay_bank_transaction => Post "/transactions/replay" impl OrderStore);
/// Records a transaction an operator has verified by hand. Besides the portal secret, the body must carry the admin key
/// and name the operator.
pub async fn replay_bank_transaction<B: OrderStore>(
    body: web::Json<ReplayRequest>,
    auth: web::Data<AuthConfig>,
    reconciliation: web::Data<ReconciliationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let ReplayRequest { transaction, verified_by, admin_key } = body.into_inner();
    if !secrets_match(auth.admin_key.reveal(), admin_key.trim()) {
        warn!("💻️ Manual replay of {} rejected: bad admin key", transaction.portal_transaction_id);
        return Err(ServerError::Unauthorized);
    }
    let tx = NewBankTransaction::try_from(transaction)?;
    let result = reconciliation.replay_bank_transaction(tx, &verified_by).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Cron  ----------------------------------------------------
route!(expire_orders => Post "/expire-orders" impl OrderStore);
pub async fn expire_orders<B: OrderStore>(
    config: web::Data<ServerConfig>,
    api: web::Data<ExpiryApi<B>>,
) -> Result<HttpResponse, ServerError> {
    info!("💻️ Expiry sweep requested");
    let result = api.expire_orders(config.order_expiry).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(webhook_retry => Post "/webhook-retry" impl OrderStore, KeyValueStore, WebhookTransport);
pub async fn webhook_retry<B, K, T>(api: web::Data<DeliveryApi<B, K, T>>) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    info!("💻️ Webhook retry sweep requested");
    let report = api.retry_sweep().await?;
    Ok(HttpResponse::Ok().json(report))
}

//----------------------------------------------   Admin  ----------------------------------------------------
route!(pending_webhooks => Get "/webhooks/pending" impl OrderStore, KeyValueStore, WebhookTransport);
pub async fn pending_webhooks<B, K, T>(api: web::Data<DeliveryApi<B, K, T>>) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    let counts = api.pending_notification_counts().await?;
    Ok(HttpResponse::Ok().json(counts))
}

route!(resend_webhooks => Post "/webhooks/resend" impl OrderStore, KeyValueStore, WebhookTransport);
pub async fn resend_webhooks<B, K, T>(
    body: web::Json<ResendRequest>,
    api: web::Data<DeliveryApi<B, K, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    let ResendRequest { order_codes, status_override, actor } = body.into_inner();
    let actor = actor.unwrap_or_else(|| DEFAULT_ADMIN_ACTOR.to_string());
    info!("💻️ {actor} requested a resend for {} orders (override: {status_override:?})", order_codes.len());
    let report = api.resend_bulk(&order_codes, status_override, &actor).await?;
    Ok(HttpResponse::Ok().json(report))
}

route!(resend_by_callback => Post "/webhooks/resend-by-callback" impl OrderStore, KeyValueStore, WebhookTransport);
pub async fn resend_by_callback<B, K, T>(
    body: web::Json<ResendByCallbackRequest>,
    api: web::Data<DeliveryApi<B, K, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    let ResendByCallbackRequest { pattern, status_override, actor } = body.into_inner();
    let actor = actor.unwrap_or_else(|| DEFAULT_ADMIN_ACTOR.to_string());
    info!("💻️ {actor} requested a resend for callbacks matching '{pattern}'");
    let report = api.resend_by_callback_pattern(&pattern, status_override, &actor).await?;
    Ok(HttpResponse::Ok().json(report))
}

route!(cache_webhook_context => Post "/webhooks/cache" impl OrderStore, KeyValueStore, WebhookTransport);
pub async fn cache_webhook_context<B, K, T>(
    body: web::Json<CacheContextRequest>,
    api: web::Data<DeliveryApi<B, K, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderStore,
    K: KeyValueStore,
    T: WebhookTransport,
{
    let req = body.into_inner();
    let ttl = req.ttl();
    let code = req.order_code.clone();
    api.cache_context(req.into(), ttl).await?;
    Ok(HttpResponse::Ok().json(JsonResponse::success(format!("Webhook context for {code} cached"))))
}
