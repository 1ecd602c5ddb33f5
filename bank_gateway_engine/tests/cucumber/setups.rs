use std::str::FromStr;

use bank_gateway_engine::db_types::{OrderStatusType, OrderType};
use cucumber::given;

use crate::cucumber::{world::GatewaySystem, GatewayWorld};

#[given("a fresh gateway")]
async fn fresh_gateway(world: &mut GatewayWorld) {
    world.system = Some(GatewaySystem::new().await);
}

#[given(expr = "a {word} order {word} for {int}")]
async fn create_order(world: &mut GatewayWorld, order_type: String, code: String, amount: i64) {
    let order_type = OrderType::from_str(&order_type).expect("Not a valid order type");
    let sys = world.system();
    sys.fixture.create_order(&sys.store, &code, order_type, amount).await.expect("Error creating order");
}

#[given(expr = "order {word} has status {word}")]
async fn force_status(world: &mut GatewayWorld, code: String, status: String) {
    let sys = world.system();
    let mut order = sys.order(&code);
    order.status = OrderStatusType::from_str(&status).expect("Not a valid order status");
    sys.store.put_order(order);
}

#[given(expr = "order {word} has no callback URL")]
async fn remove_callback(world: &mut GatewayWorld, code: String) {
    let sys = world.system();
    let mut order = sys.order(&code);
    order.callback_url = None;
    sys.store.put_order(order);
}

#[given("the store goes offline")]
async fn store_offline(world: &mut GatewayWorld) {
    world.system().store.set_offline(true);
}
