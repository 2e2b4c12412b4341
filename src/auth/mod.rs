//! Authentication module for machine-to-machine bearer tokens
//!
//! This module provides:
//! - Credential and access token types
//! - A concurrent token cache
//! - The OAuth2 client-credentials broker
//! - Token-gated execution of a unit of work

mod broker;
mod cache;
mod credentials;
mod gate;

pub use broker::{AuthError, AuthFlow, CredentialBroker, OAuthBroker, TokenRequest};
pub use cache::{CacheKey, TokenCache};
pub use credentials::{AccessToken, Credentials};
pub use gate::{with_token, GateOutcome, TokenGate};

#[cfg(test)]
pub(crate) use gate::stubs;
