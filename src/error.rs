//! Error types for gpt-relay.
//!
//! Every fallible operation in the crate returns [`RelayError`]. Causes from
//! lower layers (reqwest, serde, toml, io) are flattened into strings at the
//! boundary so the error stays `Clone + Eq` and can cross task boundaries.
//!
//! The library uses no error crates; only the CLI binary reports through
//! anyhow.

use std::fmt;

/// Errors that can occur while counting tokens or relaying a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError {
    /// The specific error that occurred
    pub kind: RelayErrorKind,
}

/// Specific relay error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// Configuration is missing or cannot produce an endpoint
    Config {
        /// The configuration field at fault
        field: String,
        /// Why it was rejected
        reason: String,
    },
    /// The proxy URL could not be parsed or applied
    InvalidProxy {
        /// The proxy URL as supplied
        url: String,
        /// Why it was rejected
        reason: String,
    },
    /// No overhead table or tokenizer exists for the model
    UnsupportedModel {
        /// The model that was requested
        model: String,
    },
    /// The provider failed or returned an unusable response
    Upstream {
        /// Short description of what failed
        message: String,
        /// HTTP status code, when the provider answered
        status: Option<u16>,
        /// The underlying cause, when one is known
        cause: Option<String>,
    },
    /// The caller cancelled the call or stopped consuming output
    Cancelled {
        /// What was interrupted
        reason: String,
    },
}

impl RelayError {
    /// Creates a new RelayError with the given kind.
    #[must_use]
    pub fn new(kind: RelayErrorKind) -> Self {
        Self { kind }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Config {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates an invalid proxy error.
    #[must_use]
    pub fn invalid_proxy(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::InvalidProxy {
            url: url.into(),
            reason: reason.into(),
        })
    }

    /// Creates an unsupported model error.
    #[must_use]
    pub fn unsupported_model(model: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::UnsupportedModel {
            model: model.into(),
        })
    }

    /// Creates an upstream error without an attached cause.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Upstream {
            message: message.into(),
            status: None,
            cause: None,
        })
    }

    /// Creates an upstream error wrapping an underlying cause.
    #[must_use]
    pub fn upstream_with_cause(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(RelayErrorKind::Upstream {
            message: message.into(),
            status: None,
            cause: Some(cause.to_string()),
        })
    }

    /// Creates an upstream error for a non-success HTTP status.
    #[must_use]
    pub fn upstream_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(RelayErrorKind::Upstream {
            message: "request failed".to_string(),
            status: Some(status),
            cause: if body.is_empty() { None } else { Some(body) },
        })
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Cancelled {
            reason: reason.into(),
        })
    }

    /// Returns true if this error was caused by caller cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, RelayErrorKind::Cancelled { .. })
    }

    /// Returns true if the provider or transport failed.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self.kind, RelayErrorKind::Upstream { .. })
    }

    /// Returns true if the model has no tokenizer support.
    #[must_use]
    pub fn is_unsupported_model(&self) -> bool {
        matches!(self.kind, RelayErrorKind::UnsupportedModel { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self.kind, RelayErrorKind::Config { .. })
    }

    /// Returns true if the proxy URL was rejected.
    #[must_use]
    pub fn is_invalid_proxy(&self) -> bool {
        matches!(self.kind, RelayErrorKind::InvalidProxy { .. })
    }

    /// Returns the HTTP status attached to an upstream error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            RelayErrorKind::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RelayErrorKind::Config { field, reason } => {
                write!(f, "invalid configuration for '{}': {}", field, reason)
            }
            RelayErrorKind::InvalidProxy { url, reason } => {
                write!(f, "invalid proxy URL '{}': {}", url, reason)
            }
            RelayErrorKind::UnsupportedModel { model } => {
                write!(
                    f,
                    "token counting is not implemented for model '{}'; \
                     see https://github.com/openai/openai-python/blob/main/chatml.md",
                    model
                )
            }
            RelayErrorKind::Upstream {
                message,
                status,
                cause,
            } => {
                write!(f, "upstream error: {}", message)?;
                if let Some(status) = status {
                    write!(f, " (HTTP {})", status)?;
                }
                if let Some(cause) = cause {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
            RelayErrorKind::Cancelled { reason } => {
                write!(f, "cancelled: {}", reason)
            }
        }
    }
}

impl std::error::Error for RelayError {}
