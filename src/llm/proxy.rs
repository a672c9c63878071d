//! Transport client construction with optional proxy routing.

use crate::error::RelayError;
use reqwest::{Client, Proxy};
use std::time::Duration;
use url::Url;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy schemes the transport can route through.
const SUPPORTED_PROXY_SCHEMES: &[&str] = &["http", "https"];

/// HTTP client used for every provider call.
///
/// Holds no per-call state; clones share one connection pool and may be
/// used from any number of tasks at once.
#[derive(Debug, Clone)]
pub struct TransportClient {
    inner: Client,
    proxy: Option<Url>,
}

impl TransportClient {
    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.inner
    }

    /// Returns the proxy outbound connections are routed through, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Returns true if connections are routed through a proxy.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }
}

/// Builds [`TransportClient`]s.
#[derive(Debug, Clone, Copy)]
pub struct ProxyClientFactory {
    connect_timeout: Duration,
}

impl ProxyClientFactory {
    /// Creates a factory with the default connect timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connect timeout. Streams themselves have no overall timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds a client, routed through `proxy_url` when one is given.
    ///
    /// `None` and blank strings both mean "no proxy".
    ///
    /// # Errors
    ///
    /// Returns `InvalidProxy` if the URL is malformed or uses an unsupported
    /// scheme, and `Upstream` if the TLS backend cannot be initialized.
    pub fn build(&self, proxy_url: Option<&str>) -> Result<TransportClient, RelayError> {
        let proxy = match proxy_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_proxy_url(raw)?),
            None => None,
        };

        let mut builder = Client::builder().connect_timeout(self.connect_timeout);
        if let Some(ref url) = proxy {
            let route = Proxy::all(url.as_str())
                .map_err(|e| RelayError::invalid_proxy(url.as_str(), e.to_string()))?;
            builder = builder.proxy(route);
            tracing::debug!(proxy = %url, "Routing provider traffic through proxy");
        }

        let inner = builder
            .build()
            .map_err(|e| RelayError::upstream_with_cause("failed to create HTTP client", e))?;

        Ok(TransportClient { inner, proxy })
    }
}

impl Default for ProxyClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_proxy_url(raw: &str) -> Result<Url, RelayError> {
    let url = Url::parse(raw).map_err(|e| RelayError::invalid_proxy(raw, e.to_string()))?;

    if !SUPPORTED_PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(RelayError::invalid_proxy(
            raw,
            format!("unsupported scheme '{}'; use http or https", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::invalid_proxy(raw, "missing host"));
    }

    Ok(url)
}
