use actix_web::{http::StatusCode, test::TestRequest};
use bank_gateway_engine::{db_types::OrderType, test_utils::RecordingTransport};

use super::helpers::{json, TestGateway};

const CODE: &str = "ABO20250101STATUSA";

#[actix_web::test]
async fn health() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let (status, body) = gw.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn store_health_reports_the_circuit_state() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let (status, body) = gw.send(TestRequest::get().uri("/health/store")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let health = json(&body);
    assert_eq!(health["primary"]["state"], "closed");
    assert!(health["replica"].is_null());

    gw.store.set_offline(true);
    let mut last = StatusCode::OK;
    for _ in 0..3 {
        last = gw.send(TestRequest::get().uri("/health/store")).await.0;
    }
    assert_eq!(last, StatusCode::SERVICE_UNAVAILABLE);
    let (_, body) = gw.send(TestRequest::get().uri("/health/store")).await;
    assert_eq!(json(&body)["primary"]["state"], "open");
}

#[actix_web::test]
async fn order_status_comes_from_the_store() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    gw.fixture.create_order(&gw.store, CODE, OrderType::Deposit, 70_000).await.unwrap();
    let (status, body) = gw.send(TestRequest::get().uri(&format!("/orders/{CODE}/status"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let view = json(&body);
    assert_eq!(view["orderCode"], CODE);
    assert_eq!(view["status"], "pending");
    assert_eq!(view["amountUnpaid"], 70_000);
    assert_eq!(view["source"], "store");

    let (status, _) = gw.send(TestRequest::get().uri("/orders/ABO20250101NOSUCHO/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn order_status_falls_back_to_the_last_snapshot() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    gw.fixture.create_order(&gw.store, CODE, OrderType::Withdraw, 70_000).await.unwrap();
    // The first read takes the snapshot
    assert_eq!(gw.send(TestRequest::get().uri(&format!("/orders/{CODE}/status"))).await.0, StatusCode::OK);

    gw.store.set_offline(true);
    let (status, body) = gw.send(TestRequest::get().uri(&format!("/orders/{CODE}/status"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["source"], "fallback");

    // Never seen before, so the status is unknown rather than missing
    let (status, _) = gw.send(TestRequest::get().uri("/orders/ABO20250101NEVERSE/status")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
