use std::time::Duration;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, App};
use bank_gateway_engine::{
    connection::{CircuitBreakerConfig, ConnectionConfig, ConnectionManager},
    events::{EventProducer, EventProducers, OrderFinalizedEvent},
    fallback::{FallbackCacheConfig, FallbackCacheStore},
    test_utils::{seed_store, Fixture, MemoryKeyValueStore, MemoryStore},
    traits::WebhookTransport,
    DeliveryApi,
    DeliveryConfig,
};
use bgw_common::Secret;
use log::debug;
use tokio::sync::mpsc;

use crate::{
    config::{AuthConfig, ServerConfig},
    server::ServerContext,
};

pub const BANK_SECRET: &str = "bank-portal-secret";
pub const ADMIN_KEY: &str = "admin-key-0123456789";
pub const CRON_SECRET: &str = "cron-secret-0123456789";
pub const MAX_ATTEMPTS: u32 = 3;

pub fn test_config() -> ServerConfig {
    let auth = AuthConfig {
        bank_webhook_secret: Secret::new(BANK_SECRET.to_string()),
        admin_key: Secret::new(ADMIN_KEY.to_string()),
        cron_secret: Secret::new(CRON_SECRET.to_string()),
        max_attempts: MAX_ATTEMPTS,
        ..AuthConfig::default()
    };
    let breaker = CircuitBreakerConfig { failure_threshold: 3, ..CircuitBreakerConfig::default() };
    ServerConfig {
        auth,
        start_workers: false,
        order_expiry: Duration::from_secs(3600),
        connection: ConnectionConfig { call_timeout: Duration::from_secs(1), breaker },
        delivery: DeliveryConfig { inter_request_delay: Duration::ZERO, ..DeliveryConfig::default() },
        ..ServerConfig::default()
    }
}

/// A gateway backed by in-memory stores, with a receiver for every finalized-order event.
pub struct TestGateway<T> {
    pub store: MemoryStore,
    pub fixture: Fixture,
    pub context: ServerContext<MemoryStore, MemoryKeyValueStore, T>,
    pub finalized: mpsc::Receiver<OrderFinalizedEvent>,
}

impl<T: WebhookTransport + 'static> TestGateway<T> {
    pub async fn new(transport: T) -> Self {
        let _ = env_logger::try_init();
        let config = test_config();
        let store = MemoryStore::default();
        let fixture = seed_store(&store).await.expect("Error seeding store");
        let conn = ConnectionManager::new(store.clone(), None, config.connection.clone());
        let cache = FallbackCacheStore::new(Some(MemoryKeyValueStore::default()), FallbackCacheConfig::default());
        let delivery = DeliveryApi::new(conn.clone(), cache.clone(), transport, config.delivery.clone());
        let (tx, finalized) = mpsc::channel(32);
        let producers =
            EventProducers { order_finalized_producer: vec![EventProducer::new(tx)], ..Default::default() };
        let context = ServerContext::new(conn, cache, delivery, producers, config);
        Self { store, fixture, context, finalized }
    }

    /// Sends `req` through a freshly initialised app. Errors raised by middleware are rendered the way the server
    /// would render them.
    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let context = self.context.clone();
        let app = App::new().configure(|cfg| context.configure(cfg));
        let service = test::init_service(app).await;
        let req = req.to_request();
        debug!("Making request to {}", req.path());
        let res = match test::try_call_service(&service, req).await {
            Ok(res) => res.into_parts().1,
            Err(e) => e.error_response(),
        };
        let status = res.status();
        let body = res.into_body().try_into_bytes().map(|b| String::from_utf8_lossy(&b).into_owned());
        (status, body.unwrap_or_default())
    }

    pub fn finalized_count(&mut self) -> usize {
        let mut n = 0;
        while self.finalized.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

pub fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Invalid JSON ({e}): {body}"))
}

pub fn bank_post(path: &str, secret: &str, body: serde_json::Value) -> TestRequest {
    TestRequest::post().uri(path).insert_header(("X-Bank-Secret", secret)).set_json(body)
}

pub fn bearer(req: TestRequest, token: &str) -> TestRequest {
    req.insert_header(("Authorization", format!("Bearer {token}")))
}

pub fn transaction_json(tx_id: &str, amount: f64, description: &str) -> serde_json::Value {
    serde_json::json!({
        "portalId": bank_gateway_engine::test_utils::TEST_PORTAL,
        "portalTransactionId": tx_id,
        "amount": amount,
        "description": description,
        "bankAccountNumber": bank_gateway_engine::test_utils::TEST_ACCOUNT_NUMBER,
    })
}
