//! Transport and session configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

const BASE_URL_ENV: &str = "CFFORGE_BASE_URL";
const PROXY_ENV: &str = "CFFORGE_PROXY";

/// Whether a request carries the session cookie jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsMode {
    /// Send and store session cookies.
    #[default]
    Include,
    /// Send the request anonymously.
    Omit,
}

/// Options shared by every transport, plus the transport's own settings.
///
/// # Example
/// ```rust
/// use cfforge_client::options::{HttpTransport, TransportOptions};
/// use std::time::Duration;
///
/// let options = TransportOptions::new(
///     HttpTransport::default().with_base_url("https://forge.example.com".to_string()),
/// )
/// .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Whole-exchange timeout
    pub timeout: Option<Duration>,

    /// Settings of the concrete transport
    pub provider: T,
}

impl<T> TransportOptions<T> {
    pub fn new(provider: T) -> Self {
        Self {
            timeout: None,
            provider,
        }
    }

    /// Set the timeout.
    ///
    /// The timeout covers the whole exchange, body included, so long-running
    /// generation streams need a generous value or none at all.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Settings for [`crate::http::ReqwestTransport`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// Origin of the Forge API, e.g. `https://forge.example.com`
    pub base_url: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl HttpTransport {
    /// Read `CFFORGE_BASE_URL` and `CFFORGE_PROXY` from the environment.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(BASE_URL_ENV).ok().filter(|v| !v.is_empty()),
            proxy: std::env::var(PROXY_ENV).ok().filter(|v| !v.is_empty()),
            extra_headers: None,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url_or_default(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

/// Session-layer endpoints and redirect targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Prefix of every REST path
    pub api_prefix: String,

    /// Endpoint that exchanges the refresh cookie for a new session
    pub refresh_path: String,

    /// Login entry point the user is sent to when the session is gone
    pub login_path: String,

    /// Where to return after login when the requested location is unusable
    pub default_return_to: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            api_prefix: "/api/v1".to_string(),
            refresh_path: "/api/v1/auth/refresh".to_string(),
            login_path: "/login".to_string(),
            default_return_to: "/dashboard".to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_api_prefix(mut self, prefix: String) -> Self {
        self.api_prefix = prefix;
        self
    }

    pub fn with_refresh_path(mut self, path: String) -> Self {
        self.refresh_path = path;
        self
    }

    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    /// Join a resource path onto the API prefix.
    pub fn api_path(&self, path: &str) -> String {
        format!("{}{}", self.api_prefix.trim_end_matches('/'), path)
    }
}
