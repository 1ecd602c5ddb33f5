use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MerchantApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid callback URL: {0}")]
    InvalidUrl(String),
    #[error("Could not serialize payload: {0}")]
    JsonError(String),
    #[error("The merchant endpoint did not respond in time: {0}")]
    Timeout(String),
    #[error("The merchant endpoint could not be reached: {0}")]
    Unreachable(String),
    #[error("The merchant endpoint rejected the notification. Status {status}. {message}")]
    Rejected { status: u16, message: String },
}

impl MerchantApiError {
    /// True for failures that say nothing about the payload itself, i.e. the same request could succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
