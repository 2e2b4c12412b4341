//! Credential broker - machine-to-machine token exchange
//!
//! Exchanges a registered client's credentials for a short-lived bearer
//! token using the OAuth2 `client_credentials` grant:
//! - Token caching keyed by provider and scope set
//! - Typed failures for unreachable providers, bad credentials and rejected scopes
//! - No retries; the caller decides what to do with a failure

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

use super::cache::{CacheKey, TokenCache};
use super::credentials::{AccessToken, Credentials};
use crate::config::{IdentityConfig, ProviderConfig};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity provider name is empty")]
    MissingProvider,

    #[error("identity provider '{0}' is not configured")]
    UnknownProvider(String),

    #[error("identity provider '{provider}' is unreachable: {source}")]
    Unreachable {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid client credentials for '{provider}': {detail}")]
    InvalidCredentials { provider: String, detail: String },

    #[error("scopes rejected by '{provider}': {detail}")]
    ScopeRejected { provider: String, detail: String },

    #[error("token request to '{provider}' failed with status {status}: {detail}")]
    Rejected {
        provider: String,
        status: u16,
        detail: String,
    },

    #[error("malformed token response from '{provider}': {detail}")]
    MalformedResponse { provider: String, detail: String },
}

/// Supported authentication flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFlow {
    /// Machine-to-machine: OAuth2 client credentials grant
    #[default]
    M2M,
}

impl fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFlow::M2M => write!(f, "M2M"),
        }
    }
}

/// What to ask the identity provider for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub provider_name: String,
    /// Empty means the provider's default scope
    pub scopes: BTreeSet<String>,
    pub flow: AuthFlow,
    /// Skip the cache lookup and always hit the provider
    pub force: bool,
}

impl TokenRequest {
    /// Machine-to-machine request that may be served from cache
    pub fn m2m(provider_name: impl Into<String>, scopes: BTreeSet<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            scopes,
            flow: AuthFlow::M2M,
            force: false,
        }
    }
}

/// Anything that can hand out bearer tokens
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn acquire(&self, request: &TokenRequest) -> Result<AccessToken, AuthError>;
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// RFC 6749 error body
#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client credentials token request
#[derive(Debug, Serialize)]
struct ClientCredentialsRequest<'a> {
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// OAuth2 client-credentials broker backed by the configured provider registry
#[derive(Clone)]
pub struct OAuthBroker {
    providers: HashMap<String, ProviderConfig>,
    cache: TokenCache,
    http_client: Client,
}

impl OAuthBroker {
    pub fn new(identity: &IdentityConfig) -> Self {
        Self {
            providers: identity.providers.clone(),
            cache: TokenCache::new(),
            http_client: Client::new(),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Perform the client credentials exchange against the token endpoint
    async fn exchange(
        &self,
        provider_name: &str,
        provider: &ProviderConfig,
        scopes: &BTreeSet<String>,
    ) -> Result<Credentials, AuthError> {
        let scope = if scopes.is_empty() {
            None
        } else {
            Some(scopes.iter().cloned().collect::<Vec<_>>().join(" "))
        };

        let request = ClientCredentialsRequest {
            grant_type: "client_credentials",
            scope,
        };

        let response = self
            .http_client
            .post(&provider.token_url)
            .basic_auth(&provider.client_id, Some(&provider.client_secret))
            .form(&request)
            .send()
            .await
            .map_err(|source| AuthError::Unreachable {
                provider: provider_name.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::MalformedResponse {
                provider: provider_name.to_string(),
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(classify_failure(provider_name, status.as_u16(), &body));
        }

        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::MalformedResponse {
                provider: provider_name.to_string(),
                detail: e.to_string(),
            })?;

        let expires_in = token_response.expires_in;
        Credentials::new(token_response.access_token, expires_in, token_response.scope).ok_or_else(|| {
            AuthError::MalformedResponse {
                provider: provider_name.to_string(),
                detail: format!("expires_in out of range: {:?}", expires_in),
            }
        })
    }
}

#[async_trait]
impl CredentialBroker for OAuthBroker {
    async fn acquire(&self, request: &TokenRequest) -> Result<AccessToken, AuthError> {
        if request.provider_name.trim().is_empty() {
            return Err(AuthError::MissingProvider);
        }

        let key = CacheKey::new(&request.provider_name, &request.scopes);

        if !request.force {
            if let Some(creds) = self.cache.get(&key) {
                tracing::debug!("Using cached access token for {}", request.provider_name);
                return Ok(creds.issue());
            }
        }

        let provider = self
            .providers
            .get(&request.provider_name)
            .ok_or_else(|| AuthError::UnknownProvider(request.provider_name.clone()))?;

        tracing::info!(
            "Requesting {} token from {} ({} scopes)",
            request.flow,
            request.provider_name,
            request.scopes.len()
        );
        let creds = self
            .exchange(&request.provider_name, provider, &request.scopes)
            .await?;

        let token = creds.issue();
        self.cache.put(key, creds);
        Ok(token)
    }
}

fn classify_failure(provider: &str, status: u16, body: &str) -> AuthError {
    let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error.as_deref().unwrap_or("");
    let detail = parsed
        .error_description
        .clone()
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| body.trim().to_string());
    let provider = provider.to_string();

    match code {
        "invalid_scope" => AuthError::ScopeRejected { provider, detail },
        "invalid_client" | "unauthorized_client" => AuthError::InvalidCredentials { provider, detail },
        _ if status == 401 => AuthError::InvalidCredentials { provider, detail },
        _ => AuthError::Rejected {
            provider,
            status,
            detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn identity(token_url: String) -> IdentityConfig {
        let mut identity = IdentityConfig::default();
        identity.providers.insert(
            "gateway-identity".to_string(),
            ProviderConfig {
                token_url,
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
        );
        identity
    }

    fn scopes(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Token endpoint that issues `token-<n>` and records the last scope
    async fn token_endpoint(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/oauth2/token",
            post(move |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.starts_with("Basic "))
                        .unwrap_or(false);
                    if !authorized || form.get("grant_type").map(String::as_str) != Some("client_credentials") {
                        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request"})));
                    }
                    if form.get("scope").map(String::as_str) == Some("forbidden") {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "invalid_scope", "error_description": "scope not allowed"})),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "access_token": format!("token-{n}"),
                            "expires_in": 3600,
                            "token_type": "Bearer",
                            "scope": form.get("scope"),
                        })),
                    )
                }
            }),
        );
        let addr = spawn_server(app).await;
        format!("http://{}/oauth2/token", addr)
    }

    #[tokio::test]
    async fn test_acquire_exchanges_and_caches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let broker = OAuthBroker::new(&identity(token_endpoint(hits.clone()).await));
        let request = TokenRequest::m2m("gateway-identity", scopes(&["gateway/invoke"]));

        let first = broker.acquire(&request).await.unwrap();
        assert_eq!(first.secret(), "token-1");

        let second = broker.acquire(&request).await.unwrap();
        assert_eq!(second.secret(), "token-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache_and_refreshes_it() {
        let hits = Arc::new(AtomicUsize::new(0));
        let broker = OAuthBroker::new(&identity(token_endpoint(hits.clone()).await));
        let mut request = TokenRequest::m2m("gateway-identity", BTreeSet::new());

        broker.acquire(&request).await.unwrap();
        request.force = true;
        let forced = broker.acquire(&request).await.unwrap();
        assert_eq!(forced.secret(), "token-2");

        request.force = false;
        let cached = broker.acquire(&request).await.unwrap();
        assert_eq!(cached.secret(), "token-2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_scope() {
        let hits = Arc::new(AtomicUsize::new(0));
        let broker = OAuthBroker::new(&identity(token_endpoint(hits).await));
        let request = TokenRequest::m2m("gateway-identity", scopes(&["forbidden"]));

        let err = broker.acquire(&request).await.unwrap_err();
        assert!(matches!(err, AuthError::ScopeRejected { ref detail, .. } if detail == "scope not allowed"));
        assert!(broker.cache().is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_malformed() {
        let app = Router::new().route(
            "/oauth2/token",
            post(|| async { Json(json!({"access_token": "x", "expires_in": i64::MAX})) }),
        );
        let addr = spawn_server(app).await;
        let broker = OAuthBroker::new(&identity(format!("http://{}/oauth2/token", addr)));

        let err = broker
            .acquire(&TokenRequest::m2m("gateway-identity", BTreeSet::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse { ref detail, .. } if detail.contains("expires_in")));
        assert!(broker.cache().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_missing_provider() {
        let broker = OAuthBroker::new(&IdentityConfig::default());

        let err = broker
            .acquire(&TokenRequest::m2m("nobody", BTreeSet::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownProvider(ref name) if name == "nobody"));

        let err = broker
            .acquire(&TokenRequest::m2m("", BTreeSet::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingProvider));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let broker = OAuthBroker::new(&identity(format!("http://{}/oauth2/token", addr)));
        let err = broker
            .acquire(&TokenRequest::m2m("gateway-identity", BTreeSet::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unreachable { .. }));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("idp", 400, r#"{"error":"invalid_client"}"#),
            AuthError::InvalidCredentials { .. }
        ));
        assert!(matches!(
            classify_failure("idp", 401, "nope"),
            AuthError::InvalidCredentials { ref detail, .. } if detail == "nope"
        ));
        assert!(matches!(
            classify_failure("idp", 503, "<html>down</html>"),
            AuthError::Rejected { status: 503, .. }
        ));
    }

    #[test]
    fn test_auth_flow_display() {
        assert_eq!(AuthFlow::M2M.to_string(), "M2M");
        assert_eq!(TokenRequest::m2m("idp", BTreeSet::new()).flow, AuthFlow::M2M);
    }
}
