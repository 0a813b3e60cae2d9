use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::Url;
use std::sync::Arc;

/// Endpoint used until a valid URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:9200/";

/// Snapshot of where documents go and how requests authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL with any `user:password@` part removed.
    pub base_url: String,
    /// Precomputed `Authorization` header value, e.g. `Basic YWRtaW46c2VjcmV0`.
    pub authorization: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            authorization: None,
        }
    }
}

/// Error type returned by [`Endpoint::try_configure`].
#[derive(thiserror::Error, Debug)]
pub enum EndpointError {
    #[error("invalid endpoint URL: {0}")]
    Parse(String),

    #[error("endpoint URL has no host/path hierarchy: {0}")]
    NotHierarchical(String),

    #[error("endpoint credentials are not valid UTF-8")]
    Credentials(#[from] std::string::FromUtf8Error),
}

/// Shared, swappable endpoint configuration.
///
/// Writers take one [`EndpointConfig`] snapshot per request, so a
/// concurrent `configure` is seen either entirely or not at all.
#[derive(Debug)]
pub struct Endpoint {
    config: ArcSwap<EndpointConfig>,
}

impl Endpoint {
    pub fn new() -> Self {
        Endpoint {
            config: ArcSwap::from_pointee(EndpointConfig::default()),
        }
    }

    /// Build an endpoint and apply `raw_url` on top of the default.
    pub fn with_url(raw_url: &str) -> Self {
        let endpoint = Endpoint::new();
        endpoint.configure(raw_url);
        endpoint
    }

    /// Point the endpoint at `raw_url` and return the effective base URL.
    ///
    /// Invalid URLs are logged and ignored; the previous configuration stays
    /// in effect so shipping keeps going to the last known-good endpoint.
    pub fn configure(&self, raw_url: &str) -> String {
        match self.try_configure(raw_url) {
            Ok(base_url) => base_url,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring endpoint configuration");
                self.config.load().base_url.clone()
            }
        }
    }

    /// Like [`Endpoint::configure`], but reports why a URL was rejected.
    ///
    /// An authorization header installed by an earlier URL survives a later
    /// URL without credentials.
    pub fn try_configure(&self, raw_url: &str) -> Result<String, EndpointError> {
        let (base_url, authorization) = split_credentials(raw_url)?;

        self.config.rcu(|current| EndpointConfig {
            base_url: base_url.clone(),
            authorization: authorization.clone().or_else(|| current.authorization.clone()),
        });

        Ok(base_url)
    }

    pub fn current(&self) -> Arc<EndpointConfig> {
        self.config.load_full()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::new()
    }
}

/// Parse `raw_url` into a credential-free URL and an optional Basic-Auth
/// header value.
fn split_credentials(raw_url: &str) -> Result<(String, Option<String>), EndpointError> {
    let mut url = Url::parse(raw_url.trim()).map_err(|e| EndpointError::Parse(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(EndpointError::NotHierarchical(raw_url.to_string()));
    }

    let password = url.password().unwrap_or("");
    if url.username().is_empty() && password.is_empty() {
        return Ok((url.to_string(), None));
    }

    let username = urlencoding::decode(url.username())?.into_owned();
    let password = urlencoding::decode(password)?.into_owned();
    let credentials = format!("{}:{}", username, password);
    let header = format!("Basic {}", BASE64_STANDARD.encode(credentials));

    // Both setters only fail for URLs without a host, rejected above.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    Ok((url.to_string(), Some(header)))
}
