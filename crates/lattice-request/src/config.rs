//! Client configuration.
//!
//! Configuration can be built in code or loaded from a TOML file. Durations
//! are written in milliseconds in files:
//!
//! ```toml
//! environment = "dev"
//! tenant_id = "1"
//! login_user_type = "3"
//! retry_delay_ms = 100
//!
//! [environments]
//! dev = "https://dev-api.example.com"
//! prod = "https://api.example.com"
//!
//! [token]
//! enable_auto_refresh = true
//! buffer_time_ms = 300000
//! redirect_delay_ms = 3000
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RequestError, Result};

/// Deployment environment a client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development backend.
    Dev,
    /// Production backend.
    Prod,
    /// Locally running backend.
    Local,
}

impl Environment {
    /// The environment's key in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            "local" => Ok(Self::Local),
            other => Err(RequestError::Config(format!(
                "invalid environment '{other}', expected one of dev, prod, local"
            ))),
        }
    }
}

/// Token refresh behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Whether expiring tokens are refreshed automatically.
    pub enable_auto_refresh: bool,
    /// Lead time before expiry at which a refresh is triggered.
    #[serde(rename = "buffer_time_ms", with = "duration_ms")]
    pub buffer_time: Duration,
    /// Window during which repeated redirects to login are ignored.
    #[serde(rename = "redirect_delay_ms", with = "duration_ms")]
    pub redirect_delay: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            enable_auto_refresh: false,
            buffer_time: Duration::from_secs(5 * 60),
            redirect_delay: Duration::from_secs(3),
        }
    }
}

/// Configuration for a [`RequestClient`](crate::RequestClient).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for relative request URLs.
    pub base_url: String,
    /// Environment selected when no override is given.
    pub environment: Option<Environment>,
    /// Base URL per environment name.
    pub environments: BTreeMap<String, String>,
    /// Value of the `tenant-id` header.
    pub tenant_id: String,
    /// Value of the `login_user_type` header.
    pub login_user_type: String,
    /// Default `Content-Type` header.
    pub content_type: String,
    /// URL fragments for which no bearer token is attached.
    pub skip_auth_paths: Vec<String>,
    /// Path of the token refresh endpoint.
    pub refresh_path: String,
    /// Loading text used when a request does not set one.
    pub default_loading_text: String,
    /// Window within which an identical error message is shown once.
    #[serde(rename = "error_throttle_ms", with = "duration_ms")]
    pub error_throttle: Duration,
    /// Pause before a request is replayed after a token refresh.
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    /// Number of replays allowed after an authentication failure.
    pub max_retries: u32,
    /// Transport timeout used when a request does not set one.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Token refresh behaviour.
    pub token: TokenConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            environment: None,
            environments: BTreeMap::new(),
            tenant_id: "1".to_string(),
            login_user_type: "3".to_string(),
            content_type: "application/json".to_string(),
            skip_auth_paths: vec!["/login".to_string(), "/refresh-token".to_string()],
            refresh_path: "/refresh-token".to_string(),
            default_loading_text: "Loading...".to_string(),
            error_throttle: Duration::from_millis(1500),
            retry_delay: Duration::from_millis(100),
            max_retries: 1,
            request_timeout: Duration::from_secs(30),
            token: TokenConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with the given base URL and defaults otherwise.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(source)?;
        config.base_url = normalize_base_url(std::mem::take(&mut config.base_url));
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RequestError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Pick the environment and point `base_url` at it.
    ///
    /// A valid `override_env` wins; an invalid one is ignored with a warning
    /// and the file's `environment` is used instead.
    pub fn resolve_environment(&mut self, override_env: Option<&str>) -> Result<Environment> {
        let selected = match override_env.map(Environment::from_str) {
            Some(Ok(env)) => Some(env),
            Some(Err(err)) => {
                tracing::warn!(target: "lattice_request::config", "Ignoring environment override: {}", err);
                self.environment
            }
            None => self.environment,
        };

        let env = selected.ok_or_else(|| {
            RequestError::Config("no environment configured".to_string())
        })?;
        let url = self.environments.get(env.as_str()).ok_or_else(|| {
            RequestError::Config(format!("no base URL configured for environment '{env}'"))
        })?;

        self.base_url = normalize_base_url(url.clone());
        self.environment = Some(env);
        Ok(env)
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(base_url.into());
        self
    }

    /// Set the tenant id header value.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Set the login user type header value.
    pub fn with_login_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.login_user_type = user_type.into();
        self
    }

    /// Enable or disable automatic token refresh.
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.token.enable_auto_refresh = enabled;
        self
    }

    /// Set the refresh lead time.
    pub fn with_buffer_time(mut self, buffer: Duration) -> Self {
        self.token.buffer_time = buffer;
        self
    }

    /// Set the redirect debounce window.
    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.token.redirect_delay = delay;
        self
    }

    /// Set the pause before a post-refresh replay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the error throttle window.
    pub fn with_error_throttle(mut self, window: Duration) -> Self {
        self.error_throttle = window;
        self
    }

    /// Check whether requests to `url` skip the bearer token.
    pub fn skips_auth(&self, url: &str) -> bool {
        self.skip_auth_paths.iter().any(|path| url.contains(path.as_str()))
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
