use merchant_tools::{MerchantApiError, WebhookClient, WebhookRequest};

/// Sends one webhook request. Implementations make exactly one attempt; retries belong to the retry sweep.
#[allow(async_fn_in_trait)]
pub trait WebhookTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), MerchantApiError>;
}

impl WebhookTransport for WebhookClient {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), MerchantApiError> {
        WebhookClient::deliver(self, request).await.map(|_| ())
    }
}
