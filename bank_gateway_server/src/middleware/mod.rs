mod rate_limiter;
mod secret_auth;

pub use rate_limiter::AttemptLimiter;
pub use secret_auth::{CredentialSource, SecretAuthMiddlewareFactory, SecretAuthMiddlewareService};
