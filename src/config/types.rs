//! Configuration types.

use crate::error::RelayError;
use crate::llm::backend::{BackendProfile, DEFAULT_HOSTED_API_VERSION};
use crate::llm::request::DEFAULT_STREAM_MAX_TOKENS;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default model for both call paths.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default ceiling for blocking completions.
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Default provider base URL (without `/v1`).
pub const DEFAULT_API_URL: &str = "https://api.openai.com";

/// Which backend family requests are sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// The provider's own API
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// An Azure-hosted deployment
    Azure,
}

/// Settings for an Azure-hosted deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Resource name (the subdomain of `openai.azure.com`)
    #[serde(default)]
    pub resource_name: String,

    /// Deployment every model name is remapped to
    #[serde(default)]
    pub deployment_name: String,

    /// `api-version` query parameter; defaults to 2023-05-15
    #[serde(default)]
    pub api_version: Option<String>,

    /// Direct token value (discouraged - use api_token_env instead)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Environment variable holding the token
    #[serde(default)]
    pub api_token_env: Option<String>,
}

impl AzureConfig {
    /// Resolves the token, preferring the environment variable.
    #[must_use]
    pub fn resolve_api_token(&self) -> Option<String> {
        read_env(self.api_token_env.as_deref())
            .or_else(|| self.api_token.clone())
            .filter(|token| !token.trim().is_empty())
    }
}

/// Root configuration structure for gpt-relay.
///
/// ```toml
/// platform = "openai"
/// model = "gpt-3.5-turbo"
/// api_keys = ["sk-..."]
/// api_url = "https://api.openai.com"
/// http_proxy = "http://127.0.0.1:7890"
///
/// [logging]
/// level = "Debug"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Backend family
    #[serde(default)]
    pub platform: Platform,

    /// Model used for both call paths and for token counting
    #[serde(default = "default_model")]
    pub model: String,

    /// Ceiling for blocking completions
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ceiling for streaming calls
    #[serde(default = "default_stream_max_tokens")]
    pub stream_max_tokens: u32,

    /// API keys; only the first is used
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Environment variable that overrides `api_keys` when set
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Provider base URL without the `/v1` suffix
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Optional proxy for all provider traffic
    #[serde(default)]
    pub http_proxy: Option<String>,

    /// Connect timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Azure deployment settings, required when `platform = "azure"`
    #[serde(default)]
    pub azure: Option<AzureConfig>,

    /// File logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_stream_max_tokens() -> u32 {
    DEFAULT_STREAM_MAX_TOKENS
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn read_env(var: Option<&str>) -> Option<String> {
    let var = var.filter(|v| !v.is_empty())?;
    std::env::var(var).ok().filter(|value| !value.is_empty())
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            model: default_model(),
            max_tokens: DEFAULT_MAX_TOKENS,
            stream_max_tokens: DEFAULT_STREAM_MAX_TOKENS,
            api_keys: Vec::new(),
            api_key_env: None,
            api_url: default_api_url(),
            http_proxy: None,
            connect_timeout_secs: None,
            azure: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Creates a configuration with every default applied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Adds an API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.push(key.into());
        self
    }

    /// Sets the provider base URL.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the proxy URL.
    #[must_use]
    pub fn with_http_proxy(mut self, url: impl Into<String>) -> Self {
        self.http_proxy = Some(url.into());
        self
    }

    /// Switches to an Azure deployment.
    #[must_use]
    pub fn with_azure(mut self, azure: AzureConfig) -> Self {
        self.platform = Platform::Azure;
        self.azure = Some(azure);
        self
    }

    /// Sets the blocking and streaming ceilings.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32, stream_max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self.stream_max_tokens = stream_max_tokens;
        self
    }

    /// Resolves the API key.
    ///
    /// Resolution order:
    /// 1. `api_key_env` - read from environment variable
    /// 2. the first non-empty entry of `api_keys`
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        read_env(self.api_key_env.as_deref()).or_else(|| {
            self.api_keys
                .iter()
                .map(|key| key.trim())
                .find(|key| !key.is_empty())
                .map(str::to_string)
        })
    }

    /// Returns the configured proxy, treating blank strings as unset.
    #[must_use]
    pub fn proxy_url(&self) -> Option<&str> {
        self.http_proxy
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Returns the connect timeout, if one is configured.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Builds the backend profile for the selected platform.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first missing field.
    pub fn backend_profile(&self) -> Result<BackendProfile, RelayError> {
        match self.platform {
            Platform::OpenAi => {
                let api_key = self.resolve_api_key().ok_or_else(|| {
                    RelayError::config(
                        "api_keys",
                        "no API key configured; set api_keys or api_key_env",
                    )
                })?;
                if self.api_url.trim().is_empty() {
                    return Err(RelayError::config("api_url", "must not be empty"));
                }
                Ok(BackendProfile::direct(api_key, self.api_url.trim()))
            }
            Platform::Azure => {
                let azure = self.azure.as_ref().ok_or_else(|| {
                    RelayError::config("azure", "platform is azure but no [azure] section exists")
                })?;
                if azure.resource_name.trim().is_empty() {
                    return Err(RelayError::config("azure.resource_name", "must not be empty"));
                }
                if azure.deployment_name.trim().is_empty() {
                    return Err(RelayError::config("azure.deployment_name", "must not be empty"));
                }
                let api_token = azure.resolve_api_token().ok_or_else(|| {
                    RelayError::config(
                        "azure.api_token",
                        "no token configured; set api_token or api_token_env",
                    )
                })?;

                Ok(BackendProfile::Hosted {
                    resource_name: azure.resource_name.trim().to_string(),
                    deployment_name: azure.deployment_name.trim().to_string(),
                    api_token,
                    api_version: azure
                        .api_version
                        .clone()
                        .filter(|v| !v.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_HOSTED_API_VERSION.to_string()),
                })
            }
        }
    }
}
