//! Shared-secret middleware for Actix Web.
//!
//! Bank portals present a shared secret in a header, while the scheduler and operators present theirs as a bearer
//! token. Either way, the presented value is compared in constant time against the configured secret, and failures are
//! counted per remote IP by an [`AttemptLimiter`]. A locked-out IP gets a 429 without its credentials being checked.
//!
//! An empty configured secret matches nothing, so an unconfigured scope refuses every request.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use bgw_common::{helpers::secrets_match, Secret};
use futures::future::LocalBoxFuture;
use log::{debug, trace, warn};

use crate::{
    errors::ServerError,
    helpers::{bearer_token, get_remote_ip},
    middleware::AttemptLimiter,
};

/// Where the middleware looks for the caller's secret.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Header(String),
    Bearer,
}

impl CredentialSource {
    fn extract(&self, req: &ServiceRequest) -> Option<String> {
        match self {
            Self::Header(name) => {
                req.headers().get(name.as_str()).and_then(|v| v.to_str().ok()).map(|s| s.trim().to_string())
            },
            Self::Bearer => bearer_token(req.headers()).map(String::from),
        }
    }
}

pub struct SecretAuthMiddlewareFactory {
    source: CredentialSource,
    secret: Secret<String>,
    limiter: AttemptLimiter,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
}

impl SecretAuthMiddlewareFactory {
    pub fn new(source: CredentialSource, secret: Secret<String>, limiter: AttemptLimiter) -> Self {
        Self { source, secret, limiter, use_x_forwarded_for: false, use_forwarded: false }
    }

    pub fn with_forwarding(mut self, use_x_forwarded_for: bool, use_forwarded: bool) -> Self {
        self.use_x_forwarded_for = use_x_forwarded_for;
        self.use_forwarded = use_forwarded;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecretAuthMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = SecretAuthMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecretAuthMiddlewareService {
            source: self.source.clone(),
            secret: self.secret.clone(),
            limiter: self.limiter.clone(),
            use_x_forwarded_for: self.use_x_forwarded_for,
            use_forwarded: self.use_forwarded,
            service: Rc::new(service),
        }))
    }
}

pub struct SecretAuthMiddlewareService<S> {
    source: CredentialSource,
    secret: Secret<String>,
    limiter: AttemptLimiter,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for SecretAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let ip = get_remote_ip(req.request(), self.use_x_forwarded_for, self.use_forwarded);
        let presented = self.source.extract(&req);
        let secret = self.secret.clone();
        let limiter = self.limiter.clone();
        Box::pin(async move {
            trace!("🔐️ Checking shared secret for {} from {ip:?}", req.path());
            if let Some(ip) = ip {
                if let Err(wait) = limiter.check(ip) {
                    debug!("🔐️ {ip} is locked out for another {wait}s");
                    return Err(ServerError::TooManyAttempts(wait).into());
                }
            }
            let authorized = presented.as_deref().map(|p| secrets_match(secret.reveal(), p)).unwrap_or(false);
            if authorized {
                trace!("🔐️ Shared secret check for {} ✅️", req.path());
                if let Some(ip) = ip {
                    limiter.record_success(ip);
                }
                service.call(req).await
            } else {
                warn!("🔐️ Invalid or missing credentials for {} from {ip:?}. Denying access.", req.path());
                if let Some(ip) = ip {
                    limiter.record_failure(ip);
                }
                Err(ServerError::Unauthorized.into())
            }
        })
    }
}
