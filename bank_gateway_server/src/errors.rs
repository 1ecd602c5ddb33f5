use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use bank_gateway_engine::{traits::StoreError, DeliveryError, OrderStatusError, ReconciliationError};
use log::error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Invalid or missing credentials.")]
    Unauthorized,
    #[error("Too many failed attempts. Try again in {0} seconds.")]
    TooManyAttempts(u64),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request conflicts with the current state. {0}")]
    Conflict(String),
    #[error("The order store is temporarily unavailable. {0}")]
    StoreUnavailable(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TooManyAttempts(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InitializeError(_) |
            Self::ConfigurationError(_) |
            Self::IOError(_) |
            Self::BackendError(_) |
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("💻️ Internal error while handling request. {self}");
            "An internal error occurred.".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status)
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": message }).to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => Self::StoreUnavailable(e.to_string()),
            StoreError::Conflict(_) => Self::Conflict(e.to_string()),
            StoreError::NotFound(s) => Self::NoRecordFound(s),
            StoreError::Backend(s) => Self::BackendError(s),
        }
    }
}

impl From<ReconciliationError> for ServerError {
    fn from(e: ReconciliationError) -> Self {
        match e {
            ReconciliationError::InvalidTransaction(s) => Self::InvalidRequestBody(s),
            ReconciliationError::StoreError(e) => e.into(),
            ReconciliationError::ContendedOrder(..) => Self::Conflict(e.to_string()),
        }
    }
}

impl From<DeliveryError> for ServerError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::InvalidRequest(s) => Self::InvalidRequestBody(s),
            DeliveryError::StoreError(e) => e.into(),
            DeliveryError::ContextUnavailable(_) => Self::StoreUnavailable(e.to_string()),
            DeliveryError::ContextAlreadyCached(_) => Self::Conflict(e.to_string()),
            DeliveryError::MerchantError(e) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<OrderStatusError> for ServerError {
    fn from(e: OrderStatusError) -> Self {
        match e {
            OrderStatusError::NotFound(_) => Self::NoRecordFound(e.to_string()),
            OrderStatusError::Unknown(_) => Self::StoreUnavailable(e.to_string()),
            OrderStatusError::StoreError(e) => e.into(),
        }
    }
}
