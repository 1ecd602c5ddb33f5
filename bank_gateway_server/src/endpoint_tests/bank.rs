use actix_web::{http::StatusCode, test::TestRequest};
use bank_gateway_engine::{
    db_types::{OrderStatusType, OrderType},
    test_utils::{RecordingTransport, TEST_API_KEY, TEST_CALLBACK_URL},
};
use bgw_common::Amount;
use serde_json::json;

use super::{
    helpers::{bank_post, bearer, json, transaction_json, TestGateway, ADMIN_KEY, BANK_SECRET, MAX_ATTEMPTS},
    mocks::MockTransport,
};

const CODE: &str = "ABO20250101ABCDEFG";

#[actix_web::test]
async fn missing_or_wrong_secret_is_rejected() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let req = TestRequest::post().uri("/bank/transactions").set_json(transaction_json("ft-1", 1000.0, CODE));
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "Invalid or missing credentials.");

    let (status, _) = gw.send(bank_post("/bank/transactions", "nope", transaction_json("ft-1", 1000.0, CODE))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(gw.store.entries().is_empty());
}

#[actix_web::test]
async fn repeated_failures_lock_the_caller_out() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let from = |req: TestRequest| req.peer_addr("198.51.100.20:40000".parse().unwrap());
    for _ in 0..MAX_ATTEMPTS {
        let (status, _) = gw.send(from(bank_post("/bank/transactions", "wrong", json!({})))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    // Even the right secret is refused while locked out
    let req = from(bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-1", 1000.0, CODE)));
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(json(&body)["error"].as_str().unwrap().starts_with("Too many failed attempts"));
    // Other callers are unaffected
    let req = bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-1", 1000.0, CODE))
        .peer_addr("198.51.100.21:40000".parse().unwrap());
    assert_eq!(gw.send(req).await.0, StatusCode::OK);
}

#[actix_web::test]
async fn full_payment_completes_the_order() {
    let mut gw = TestGateway::new(RecordingTransport::default()).await;
    gw.fixture.create_order(&gw.store, CODE, OrderType::Deposit, 100_000).await.unwrap();

    let req = bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-1", 100_000.0, &format!("PAY {CODE}")));
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = json(&body);
    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["orderCode"], CODE);
    assert_eq!(result["orderStatus"], "completed");
    assert_eq!(gw.store.order(CODE).unwrap().status, OrderStatusType::Completed);
    assert_eq!(gw.finalized_count(), 1);

    // The portal retrying the same notification changes nothing
    let req = bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-1", 100_000.0, &format!("PAY {CODE}")));
    let (status, body) = gw.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "duplicated");
    assert_eq!(gw.store.order(CODE).unwrap().amount_paid, Amount::from(100_000));
    assert_eq!(gw.finalized_count(), 0);
}

#[actix_web::test]
async fn unknown_accounts_are_reported_as_unsuccessful() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let mut body = transaction_json("ft-9", 5000.0, CODE);
    body["bankAccountNumber"] = json!("999999");
    let (status, body) = gw.send(bank_post("/bank/transactions", BANK_SECRET, body)).await;
    assert_eq!(status, StatusCode::OK);
    let result = json(&body);
    assert_eq!(result["success"], false);
    assert_eq!(result["status"], "bank_account_not_found");
}

#[actix_web::test]
async fn malformed_transactions_are_bad_requests() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    let mut body = transaction_json("ft-2", 5000.0, CODE);
    body["transactionType"] = json!("sideways");
    let (status, _) = gw.send(bank_post("/bank/transactions", BANK_SECRET, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = gw.send(bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-3", -1.0, CODE))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn replay_requires_the_admin_key_and_records_the_operator() {
    let gw = TestGateway::new(RecordingTransport::default()).await;
    gw.fixture.create_order(&gw.store, CODE, OrderType::Deposit, 100_000).await.unwrap();
    let mut body = transaction_json("ft-4", 40_000.0, CODE);
    body["verifiedBy"] = json!("alice");
    body["adminKey"] = json!("not-the-key");
    let (status, _) = gw.send(bank_post("/bank/transactions/replay", BANK_SECRET, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(gw.store.entries().is_empty());

    body["adminKey"] = json!(ADMIN_KEY);
    let (status, body) = gw.send(bank_post("/bank/transactions/replay", BANK_SECRET, body)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json(&body)["status"], "partially_paid");
    let entries = gw.store.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor, "manual:alice");
}

#[actix_web::test]
async fn outage_settles_once_from_the_fallback_cache() {
    let mut transport = MockTransport::new();
    transport.expect_deliver().withf(|req| req.order_codes() == vec![CODE]).times(1).returning(|_| Ok(()));
    let gw = TestGateway::new(transport).await;
    let context = json!({
        "orderCode": CODE,
        "orderType": "deposit",
        "callbackUrl": TEST_CALLBACK_URL,
        "merchantId": gw.fixture.merchant.id,
        "merchantApiKey": TEST_API_KEY,
        "amount": 100000,
    });
    let req = bearer(TestRequest::post().uri("/admin/webhooks/cache").set_json(context), ADMIN_KEY);
    assert_eq!(gw.send(req).await.0, StatusCode::OK);

    gw.store.set_offline(true);
    for _ in 0..2 {
        let req = bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-5", 100_000.0, CODE));
        let (status, body) = gw.send(req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    }
}

#[actix_web::test]
async fn short_payments_are_not_settled_from_the_cache() {
    let mut transport = MockTransport::new();
    transport.expect_deliver().never();
    let gw = TestGateway::new(transport).await;
    let context = json!({
        "orderCode": CODE,
        "orderType": "deposit",
        "callbackUrl": TEST_CALLBACK_URL,
        "merchantId": gw.fixture.merchant.id,
        "merchantApiKey": TEST_API_KEY,
        "amount": 100000,
    });
    let req = bearer(TestRequest::post().uri("/admin/webhooks/cache").set_json(context), ADMIN_KEY);
    assert_eq!(gw.send(req).await.0, StatusCode::OK);
    gw.store.set_offline(true);
    let req = bank_post("/bank/transactions", BANK_SECRET, transaction_json("ft-6", 99_999.0, CODE));
    assert_eq!(gw.send(req).await.0, StatusCode::SERVICE_UNAVAILABLE);
}
