//! Token-gated execution
//!
//! A unit of work runs only after a bearer token has been obtained. The
//! token is moved into the work and never handed back to the caller.

use std::future::Future;
use std::sync::Arc;

use super::broker::{AuthError, CredentialBroker, TokenRequest};
use super::credentials::AccessToken;

/// Result of a gated invocation
#[derive(Debug)]
pub enum GateOutcome<T> {
    /// A token was issued and the work ran exactly once
    Authorized(T),
    /// No token; the work never ran
    Unauthorized(AuthError),
}

impl<T> GateOutcome<T> {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateOutcome::Authorized(_))
    }

    /// Collapse into a `Result`, keeping the auth error as-is
    pub fn into_result(self) -> Result<T, AuthError> {
        match self {
            GateOutcome::Authorized(value) => Ok(value),
            GateOutcome::Unauthorized(err) => Err(err),
        }
    }
}

/// Acquire one token and, on success, run `work` with it.
pub async fn with_token<T, F, Fut>(
    broker: &dyn CredentialBroker,
    request: &TokenRequest,
    work: F,
) -> GateOutcome<T>
where
    F: FnOnce(AccessToken) -> Fut,
    Fut: Future<Output = T>,
{
    match broker.acquire(request).await {
        Ok(token) => {
            tracing::info!("Access token acquired for {}", request.provider_name);
            GateOutcome::Authorized(work(token).await)
        }
        Err(err) => {
            tracing::warn!("Token acquisition failed for {}: {}", request.provider_name, err);
            GateOutcome::Unauthorized(err)
        }
    }
}

/// A broker plus a fixed token request
#[derive(Clone)]
pub struct TokenGate {
    broker: Arc<dyn CredentialBroker>,
    request: TokenRequest,
}

impl TokenGate {
    pub fn new(broker: Arc<dyn CredentialBroker>, request: TokenRequest) -> Self {
        Self { broker, request }
    }

    pub fn request(&self) -> &TokenRequest {
        &self.request
    }

    pub async fn invoke<T, F, Fut>(&self, work: F) -> GateOutcome<T>
    where
        F: FnOnce(AccessToken) -> Fut,
        Fut: Future<Output = T>,
    {
        with_token(self.broker.as_ref(), &self.request, work).await
    }
}

#[cfg(test)]
pub(crate) mod stubs {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Broker that counts calls and either issues a fixed token or fails
    pub struct CountingBroker {
        pub calls: AtomicUsize,
        /// Every request the broker was asked to serve
        pub requests: Mutex<Vec<TokenRequest>>,
        fail: bool,
    }

    impl CountingBroker {
        pub fn issuing() -> Self {
            Self { calls: AtomicUsize::new(0), requests: Mutex::new(Vec::new()), fail: false }
        }

        pub fn failing() -> Self {
            Self { fail: true, ..Self::issuing() }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialBroker for CountingBroker {
        async fn acquire(&self, request: &TokenRequest) -> Result<AccessToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                Err(AuthError::InvalidCredentials {
                    provider: request.provider_name.clone(),
                    detail: "client secret mismatch".to_string(),
                })
            } else {
                Ok(AccessToken::for_tests("stub-token"))
            }
        }
    }
}
