use bank_gateway_engine::traits::WebhookTransport;
use merchant_tools::{MerchantApiError, WebhookRequest};
use mockall::mock;

mock! {
    pub Transport {}
    impl WebhookTransport for Transport {
        async fn deliver(&self, request: &WebhookRequest) -> Result<(), MerchantApiError>;
    }
}
