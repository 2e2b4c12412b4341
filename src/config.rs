//! Configuration management
//!
//! Two layers:
//! - [`RuntimeConfig`]: process-wide settings (model, identity providers,
//!   listen port), read once at startup from `~/.gateway-agent/config.json`
//!   and overridden by environment variables.
//! - [`GatewayConfig`]: the per-invocation gateway target, read from the
//!   execution environment at the start of every request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Environment variable holding the tool gateway endpoint
pub const GATEWAY_URL: &str = "GATEWAY_URL";
/// Environment variable naming the identity provider
pub const PROVIDER_NAME: &str = "PROVIDER_NAME";
/// Environment variable holding whitespace-separated OAuth scopes
pub const COGNITO_SCOPE: &str = "COGNITO_SCOPE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<&'static str>),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where environment lookups are answered from.
///
/// The runtime reads the real process environment; tests pin a fixed map.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    /// Build a fixed source from key/value pairs
    pub fn fixed<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvSource::Fixed(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            EnvSource::Process => std::env::var(key).ok(),
            EnvSource::Fixed(map) => map.get(key).cloned(),
        }
    }
}

/// Gateway target for a single invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub gateway_url: String,
    pub provider_name: String,
    /// Empty means "provider default scope"
    pub scopes: BTreeSet<String>,
}

impl GatewayConfig {
    /// Read the gateway target from the environment.
    ///
    /// `GATEWAY_URL` and `PROVIDER_NAME` must be present and non-empty.
    /// `COGNITO_SCOPE` must be present but may be blank.
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let gateway_url = env.get(GATEWAY_URL).filter(|v| !v.trim().is_empty());
        let provider_name = env.get(PROVIDER_NAME).filter(|v| !v.trim().is_empty());
        let scope = env.get(COGNITO_SCOPE);

        let missing: Vec<&'static str> = [
            (GATEWAY_URL, gateway_url.is_none()),
            (PROVIDER_NAME, provider_name.is_none()),
            (COGNITO_SCOPE, scope.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, absent)| absent.then_some(key))
        .collect();

        let (Some(gateway_url), Some(provider_name), Some(scope)) = (gateway_url, provider_name, scope)
        else {
            return Err(ConfigError::MissingEnv(missing));
        };

        let gateway_url = gateway_url.trim().to_string();
        validate_gateway_url(&gateway_url)?;

        Ok(Self {
            gateway_url,
            provider_name: provider_name.trim().to_string(),
            scopes: parse_scopes(&scope),
        })
    }
}

/// Split a whitespace-separated scope list
pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn validate_gateway_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: GATEWAY_URL.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            key: GATEWAY_URL.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Process-wide runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Gemini API key used by the model backend
    #[serde(default)]
    pub gemini_api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum model/tool iterations per invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// System prompt handed to the model
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// HTTP listen port for `serve`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Identity providers available to the credential broker
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Registry of OAuth2 identity providers, keyed by provider name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Client-credentials settings for one identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth2 token endpoint
    pub token_url: String,

    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_port() -> u16 {
    8080
}

fn default_system_prompt() -> String {
    "You are an agent that checks the current time in different regions and posts it to Slack. \
     If no region is given, report the current time in Japan. \
     If no Slack channel is given, post to the #test-strands-agents channel."
        .to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            model: default_model(),
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            port: default_port(),
            identity: IdentityConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Apply environment overrides on top of file values
    pub fn apply_env(&mut self, env: &EnvSource) -> Result<(), ConfigError> {
        if let Some(key) = env.get("GEMINI_API_KEY") {
            self.gemini_api_key = key;
        }
        if let Some(model) = env.get("MODEL_ID").filter(|m| !m.is_empty()) {
            self.model = model;
        }
        if let Some(prompt) = env.get("SYSTEM_PROMPT").filter(|p| !p.is_empty()) {
            self.system_prompt = prompt;
        }
        if let Some(raw) = env.get("MAX_ITERATIONS") {
            self.max_iterations = parse_number("MAX_ITERATIONS", &raw)?;
        }
        if let Some(raw) = env.get("PORT") {
            self.port = parse_number("PORT", &raw)?;
        }
        Ok(())
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gateway-agent")
}

/// Get the config file path, honouring `GATEWAY_AGENT_CONFIG`
pub fn config_path() -> PathBuf {
    std::env::var("GATEWAY_AGENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

/// Load runtime configuration from the default path plus process env
pub fn load() -> Result<RuntimeConfig, ConfigError> {
    let mut config = load_from(&config_path())?;
    config.apply_env(&EnvSource::Process)?;
    Ok(config)
}

/// Load runtime configuration from a file; a missing file yields defaults
pub fn load_from(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(RuntimeConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save runtime configuration to a file
pub fn save(config: &RuntimeConfig, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;

    // Provider secrets live in this file
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
