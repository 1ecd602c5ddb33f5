use actix_web::{http::StatusCode, test::TestRequest};
use bank_gateway_engine::{
    db_types::{Order, OrderStatusType, OrderType},
    test_utils::{RecordingTransport, TEST_API_KEY, TEST_CALLBACK_URL},
    traits::OrderStore,
};
use chrono::Utc;
use serde_json::json;

use super::helpers::{bearer, json, TestGateway, ADMIN_KEY, CRON_SECRET};

async fn completed_unsent(gw: &TestGateway<RecordingTransport>, code: &str, order_type: OrderType) -> Order {
    let order = gw.fixture.create_order(&gw.store, code, order_type, 10_000).await.unwrap();
    let order = Order { status: OrderStatusType::Completed, is_sent_callback_notification: false, ..order };
    gw.store.put_order(order.clone());
    order
}

#[actix_web::test]
async fn cron_endpoints_need_the_cron_secret() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let (status, _) = gw.send(TestRequest::post().uri("/cron/expire-orders")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // The admin key is not a cron secret
    let (status, _) = gw.send(bearer(TestRequest::post().uri("/cron/expire-orders"), ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = gw.send(bearer(TestRequest::post().uri("/cron/expire-orders"), CRON_SECRET)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["expired"], json!([]));
}

#[actix_web::test]
async fn expiry_sweep_fails_stale_orders() {
    let mut gw = TestGateway::new(RecordingTransport::default()).await;
    let stale = gw.fixture.new_order("ABO20250101STALEOR", OrderType::Deposit, 10_000);
    let stale = stale.with_created_at(Utc::now() - chrono::Duration::hours(3));
    gw.store.insert_order(stale).await.unwrap();
    gw.fixture.create_order(&gw.store, "ABO20250101FRESHOR", OrderType::Deposit, 10_000).await.unwrap();

    let (status, body) = gw.send(bearer(TestRequest::post().uri("/cron/expire-orders"), CRON_SECRET)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["expired"], json!(["ABO20250101STALEOR"]));
    assert_eq!(gw.store.order("ABO20250101STALEOR").unwrap().status, OrderStatusType::Failed);
    assert_eq!(gw.store.order("ABO20250101FRESHOR").unwrap().status, OrderStatusType::Pending);
    assert_eq!(gw.finalized_count(), 1);
}

#[actix_web::test]
async fn retry_sweep_sends_unconfirmed_notifications() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    completed_unsent(&gw, "ABO20250101RETRYAA", OrderType::Deposit).await;
    completed_unsent(&gw, "ABO20250101RETRYBB", OrderType::Withdraw).await;

    let (status, body) = gw.send(bearer(TestRequest::get().uri("/admin/webhooks/pending"), ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body), json!({"deposit": 1, "withdraw": 1}));

    let (status, body) = gw.send(bearer(TestRequest::post().uri("/cron/webhook-retry"), CRON_SECRET)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let sweep = json(&body);
    assert_eq!(sweep["skipped"], false);
    assert_eq!(sweep["candidates"], 2);
    assert!(gw.store.order("ABO20250101RETRYAA").unwrap().is_sent_callback_notification);
    assert!(gw.store.order("ABO20250101RETRYBB").unwrap().is_sent_callback_notification);

    let (_, body) = gw.send(bearer(TestRequest::get().uri("/admin/webhooks/pending"), ADMIN_KEY)).await;
    assert_eq!(json(&body), json!({"deposit": 0, "withdraw": 0}));
}

#[actix_web::test]
async fn resend_with_an_override() {
    let transport = RecordingTransport::default();
    let gw = TestGateway::new(transport.clone()).await;
    gw.fixture.create_order(&gw.store, "ABO20250101RESENDA", OrderType::Deposit, 10_000).await.unwrap();
    let body = json!({
        "orderCodes": ["ABO20250101RESENDA", "ABO20250101MISSING"],
        "statusOverride": "failed",
        "actor": "bob",
    });
    let req = bearer(TestRequest::post().uri("/admin/webhooks/resend").set_json(body), ADMIN_KEY);
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let records = json(&body)["records"].as_array().cloned().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r["orderCode"] == "ABO20250101RESENDA" && r["result"] == "sent"));
    assert!(records.iter().any(|r| r["orderCode"] == "ABO20250101MISSING" && r["result"] == "failed"));

    let order = gw.store.order("ABO20250101RESENDA").unwrap();
    assert_eq!(order.status, OrderStatusType::Failed);
    assert!(order.notes.contains("bob"), "Notes were: {}", order.notes);
    assert_eq!(transport.delivered_codes(), vec!["ABO20250101RESENDA".to_string()]);
}

#[actix_web::test]
async fn resend_requires_order_codes() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let req = bearer(TestRequest::post().uri("/admin/webhooks/resend").set_json(json!({"orderCodes": []})), ADMIN_KEY);
    assert_eq!(gw.send(req).await.0, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn resend_by_callback_pattern() {
    let transport = RecordingTransport::default();
    let gw = TestGateway::new(transport.clone()).await;
    completed_unsent(&gw, "ABO20250101PATTERN", OrderType::Deposit).await;

    let req = TestRequest::post().uri("/admin/webhooks/resend-by-callback").set_json(json!({"pattern": "ab"}));
    assert_eq!(gw.send(bearer(req, ADMIN_KEY)).await.0, StatusCode::BAD_REQUEST);

    let req = TestRequest::post()
        .uri("/admin/webhooks/resend-by-callback")
        .set_json(json!({"pattern": "merchant.example"}));
    let (status, body) = gw.send(bearer(req, ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(transport.delivered_codes(), vec!["ABO20250101PATTERN".to_string()]);
}

#[actix_web::test]
async fn caching_a_context_twice_is_a_conflict() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let context = json!({
        "orderCode": "ABO20250101CACHEDA",
        "orderType": "withdraw",
        "callbackUrl": TEST_CALLBACK_URL,
        "merchantId": gw.fixture.merchant.id,
        "merchantApiKey": TEST_API_KEY,
        "ttlHours": 2,
    });
    let req = bearer(TestRequest::post().uri("/admin/webhooks/cache").set_json(context.clone()), ADMIN_KEY);
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["success"], true);

    let req = bearer(TestRequest::post().uri("/admin/webhooks/cache").set_json(context), ADMIN_KEY);
    assert_eq!(gw.send(req).await.0, StatusCode::CONFLICT);

    let missing_key = json!({
        "orderCode": "ABO20250101CACHEDB",
        "orderType": "deposit",
        "callbackUrl": TEST_CALLBACK_URL,
        "merchantId": gw.fixture.merchant.id,
        "merchantApiKey": " ",
    });
    let req = bearer(TestRequest::post().uri("/admin/webhooks/cache").set_json(missing_key), ADMIN_KEY);
    assert_eq!(gw.send(req).await.0, StatusCode::BAD_REQUEST);
}
