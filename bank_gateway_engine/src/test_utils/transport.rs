use std::sync::{Arc, Mutex, MutexGuard};

use merchant_tools::{MerchantApiError, WebhookRequest};

use crate::traits::WebhookTransport;

/// A [`WebhookTransport`] that records every request instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<WebhookRequest>>>,
    failure: Arc<Mutex<Option<MerchantApiError>>>,
}

impl RecordingTransport {
    /// Every delivery fails with `error` until this is called again with `None`. Failed requests are still recorded.
    pub fn set_failure(&self, error: Option<MerchantApiError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().len()
    }

    /// Order codes of all requests, in the order they were sent.
    pub fn delivered_codes(&self) -> Vec<String> {
        self.lock().iter().flat_map(|r| r.order_codes().into_iter().map(String::from).collect::<Vec<_>>()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WebhookRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WebhookTransport for RecordingTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), MerchantApiError> {
        self.lock().push(request.clone());
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
