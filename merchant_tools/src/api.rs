use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
    Url,
};

use crate::{config::WebhookClientConfig, helpers::sign_payload, MerchantApiError, WebhookRequest};

#[derive(Clone)]
pub struct WebhookClient {
    config: WebhookClientConfig,
    client: Arc<Client>,
}

impl WebhookClient {
    pub fn new(config: WebhookClientConfig) -> Result<Self, MerchantApiError> {
        let mut headers = HeaderMap::with_capacity(1);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| MerchantApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &WebhookClientConfig {
        &self.config
    }

    /// Performs a single signed POST of the request body to the callback URL.
    ///
    /// Returns the HTTP status on a 2xx response. There is no retry loop here: a timeout or a refused connection is
    /// reported straight back to the caller.
    pub async fn deliver(&self, request: &WebhookRequest) -> Result<u16, MerchantApiError> {
        let url = Url::parse(&request.url).map_err(|e| MerchantApiError::InvalidUrl(format!("{}: {e}", request.url)))?;
        let body = serde_json::to_vec(&request.body).map_err(|e| MerchantApiError::JsonError(e.to_string()))?;
        let signature = sign_payload(request.api_key.reveal(), &body);
        let codes = request.order_codes().join(",");
        trace!("📮️ POST {url} for [{codes}]");
        let response = self
            .client
            .post(url)
            .header(self.config.signature_header.as_str(), signature)
            .header("X-Order-Codes", codes.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MerchantApiError::Timeout(e.to_string())
                } else {
                    MerchantApiError::Unreachable(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            debug!("📮️ Merchant acknowledged [{codes}] with {status}");
            Ok(status.as_u16())
        } else {
            let message = response.text().await.unwrap_or_default();
            let message: String = message.chars().take(256).collect();
            Err(MerchantApiError::Rejected { status: status.as_u16(), message })
        }
    }
}
