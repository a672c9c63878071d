//! Backend addressing profiles.
//!
//! A profile is selected once when the client is constructed and carries
//! only the fields its addressing scheme needs.

use crate::error::RelayError;
use crate::llm::request::ChatRequest;
use serde::{Deserialize, Serialize};

/// Default `api-version` query parameter for hosted deployments.
pub const DEFAULT_HOSTED_API_VERSION: &str = "2023-05-15";

/// Domain under which hosted resources are published.
const HOSTED_DOMAIN: &str = "openai.azure.com";

/// How requests reach the completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum BackendProfile {
    /// The provider's own API, authenticated with a bearer key.
    #[serde(rename = "openai")]
    Direct {
        /// Bearer API key
        api_key: String,
        /// Base URL without the `/v1` suffix (e.g. `https://api.openai.com`)
        base_url: String,
    },
    /// An enterprise-hosted deployment addressed by resource and deployment.
    #[serde(rename = "azure")]
    Hosted {
        /// Resource name (the `{resource}` in `{resource}.openai.azure.com`)
        resource_name: String,
        /// Deployment that every model name is remapped to
        deployment_name: String,
        /// Value of the `api-key` header
        api_token: String,
        /// Value of the `api-version` query parameter
        api_version: String,
    },
}

impl BackendProfile {
    /// Creates a direct profile.
    #[must_use]
    pub fn direct(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::Direct {
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Creates a hosted profile with the default API version.
    #[must_use]
    pub fn hosted(
        resource_name: impl Into<String>,
        deployment_name: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self::Hosted {
            resource_name: resource_name.into(),
            deployment_name: deployment_name.into(),
            api_token: api_token.into(),
            api_version: DEFAULT_HOSTED_API_VERSION.to_string(),
        }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub fn platform_name(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "openai",
            Self::Hosted { .. } => "azure",
        }
    }

    /// Returns the API root that paths are appended to.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the profile has no usable address.
    pub fn base_url(&self) -> Result<String, RelayError> {
        match self {
            Self::Direct { base_url, .. } => {
                let trimmed = base_url.trim().trim_end_matches('/');
                if trimmed.is_empty() {
                    return Err(RelayError::config(
                        "api_url",
                        "cannot resolve the provider endpoint; base URL is empty",
                    ));
                }
                Ok(format!("{}/v1", trimmed))
            }
            Self::Hosted { resource_name, .. } => {
                let resource = resource_name.trim();
                if resource.is_empty() {
                    return Err(RelayError::config(
                        "azure.resource_name",
                        "cannot resolve the hosted endpoint; resource name is empty",
                    ));
                }
                Ok(format!("https://{}.{}", resource, HOSTED_DOMAIN))
            }
        }
    }

    /// Returns the full chat completions URL.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the profile has no usable address.
    pub fn chat_completions_url(&self) -> Result<String, RelayError> {
        let base = self.base_url()?;
        match self {
            Self::Direct { .. } => Ok(format!("{}/chat/completions", base)),
            Self::Hosted {
                deployment_name,
                api_version,
                ..
            } => {
                if deployment_name.trim().is_empty() {
                    return Err(RelayError::config(
                        "azure.deployment_name",
                        "cannot resolve the hosted endpoint; deployment name is empty",
                    ));
                }
                Ok(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    base,
                    deployment_name.trim(),
                    api_version
                ))
            }
        }
    }

    /// Maps the configured model name to the name the backend expects.
    #[must_use]
    pub fn remap_model(&self, model: &str) -> String {
        match self {
            Self::Direct { .. } => model.to_string(),
            Self::Hosted {
                deployment_name, ..
            } => deployment_name.clone(),
        }
    }

    /// Applies model remapping to an outbound request.
    #[must_use]
    pub fn prepare(&self, request: ChatRequest) -> ChatRequest {
        let model = self.remap_model(&request.model);
        request.with_model(model)
    }

    /// Adds this profile's authentication header.
    #[must_use]
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Direct { api_key, .. } if api_key.is_empty() => request,
            Self::Direct { api_key, .. } => request.bearer_auth(api_key),
            Self::Hosted { api_token, .. } => request.header("api-key", api_token),
        }
    }
}
