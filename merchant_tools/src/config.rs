use std::time::Duration;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("bank-gateway-webhooks/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct WebhookClientConfig {
    /// Upper bound for a single delivery attempt, connect and response included. Independent of the store timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Name of the header carrying the HMAC signature of the body
    pub signature_header: String,
}

impl Default for WebhookClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            signature_header: "X-Signature".to_string(),
        }
    }
}

impl WebhookClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
