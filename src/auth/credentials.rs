//! Bearer credentials
//!
//! [`Credentials`] is what a token endpoint hands back and what the cache
//! stores. [`AccessToken`] is the single-use handle minted from it for one
//! invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instant `secs` seconds from now, if representable
pub fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d))
}

/// OAuth2 credentials returned by a token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// The access token for API requests
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// When the access token expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credentials {
    /// Create new credentials from a token response
    ///
    /// Returns `None` when `expires_in_secs` does not fit a timestamp.
    pub fn new(access_token: String, expires_in_secs: Option<i64>, scope: Option<String>) -> Option<Self> {
        let expires_at = match expires_in_secs {
            Some(secs) => Some(expiry_after(secs)?),
            None => None,
        };

        Some(Self {
            access_token,
            token_type: default_token_type(),
            expires_at,
            scope,
        })
    }

    /// Check if the access token is expired or about to expire
    ///
    /// Returns true if the token expires within the next 5 minutes
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => {
                let buffer = chrono::Duration::minutes(5);
                Utc::now() + buffer >= expires
            }
            None => false,
        }
    }

    /// Mint a single-use token for one invocation
    pub(crate) fn issue(&self) -> AccessToken {
        AccessToken {
            secret: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Opaque bearer token for one invocation.
///
/// Only the `auth` module can mint one. It is neither `Clone` nor
/// serializable; it moves into the tool session that consumes it and is
/// dropped with it.
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    #[cfg(test)]
    pub(crate) fn for_tests(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            expires_at: None,
        }
    }

    /// Value for an `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
