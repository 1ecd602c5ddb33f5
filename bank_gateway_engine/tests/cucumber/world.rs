use std::fmt::Debug;

use bank_gateway_engine::{
    connection::{CircuitBreakerConfig, ConnectionConfig, ConnectionManager},
    db_types::{Order, OrderCode},
    events::{EventProducer, EventProducers, OrderFinalizedEvent},
    fallback::{FallbackCacheConfig, FallbackCacheStore},
    objects::{DeliveryReport, ReconcileResult},
    test_utils::{seed_store, Fixture, MemoryKeyValueStore, MemoryStore, RecordingTransport},
    DeliveryApi,
    DeliveryConfig,
    ReconciliationApi,
};
use cucumber::World;
use log::*;
use tokio::sync::mpsc;

pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Default, Debug, World)]
pub struct GatewayWorld {
    pub system: Option<GatewaySystem>,
    pub last_result: Option<ReconcileResult>,
    pub last_report: Option<DeliveryReport>,
    pub extracted_code: Option<OrderCode>,
}

impl GatewayWorld {
    pub fn system(&mut self) -> &mut GatewaySystem {
        self.system.as_mut().expect("Gateway not initialised")
    }
}

pub struct GatewaySystem {
    pub store: MemoryStore,
    pub kv: MemoryKeyValueStore,
    pub fixture: Fixture,
    pub conn: ConnectionManager<MemoryStore>,
    pub cache: FallbackCacheStore<MemoryKeyValueStore>,
    pub transport: RecordingTransport,
    pub reconciliation: ReconciliationApi<MemoryStore>,
    pub delivery: DeliveryApi<MemoryStore, MemoryKeyValueStore, RecordingTransport>,
    pub finalized: mpsc::Receiver<OrderFinalizedEvent>,
}

impl Debug for GatewaySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GatewaySystem({:?})", self.conn.get_health_status())
    }
}

impl GatewaySystem {
    pub async fn new() -> Self {
        let store = MemoryStore::default();
        let fixture = seed_store(&store).await.expect("Error seeding the store");
        let breaker = CircuitBreakerConfig { failure_threshold: FAILURE_THRESHOLD, ..Default::default() };
        let config = ConnectionConfig { breaker, ..Default::default() };
        let conn = ConnectionManager::new(store.clone(), None, config);
        let (tx, finalized) = mpsc::channel(64);
        let producers = EventProducers { order_finalized_producer: vec![EventProducer::new(tx)], ..Default::default() };
        let reconciliation = ReconciliationApi::new(conn.clone(), producers);
        let kv = MemoryKeyValueStore::default();
        let cache = FallbackCacheStore::new(Some(kv.clone()), FallbackCacheConfig::default());
        let transport = RecordingTransport::default();
        let delivery = DeliveryApi::new(conn.clone(), cache.clone(), transport.clone(), DeliveryConfig::default());
        debug!("🚀️ Gateway system ready");
        Self { store, kv, fixture, conn, cache, transport, reconciliation, delivery, finalized }
    }

    pub fn order(&self, code: &str) -> Order {
        self.store.order(code).unwrap_or_else(|| panic!("Order {code} does not exist"))
    }

    pub fn drain_finalized(&mut self) -> Vec<Order> {
        let mut orders = Vec::new();
        while let Ok(event) = self.finalized.try_recv() {
            orders.push(event.order);
        }
        orders
    }
}
