//! Single-shot request execution.
//!
//! A [`Transport`] performs exactly one exchange and reports the raw reply body
//! or a failure. Retrying, key rotation and reply classification all live in
//! [`crate::CallEngine`]; [`HttpTransport`] is the reqwest-backed implementation.

use crate::config::HttpSettings;
use crate::request::{ExchangeRequest, TimeoutMode};
use crate::{Error, Result};
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;

/// Executes one request and returns the raw reply body.
///
/// Implementations must not retry. Any failure (network, timeout, non-2xx
/// status) is reported as an `Err` and treated by the engine as an empty result.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use quotakey::{ExchangeRequest, Result, Transport};
///
/// struct Canned;
///
/// #[async_trait]
/// impl Transport for Canned {
///     async fn exchange(&self, _request: &ExchangeRequest) -> Result<String> {
///         Ok(r#"{"code":"200"}"#.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a single exchange.
    async fn exchange(&self, request: &ExchangeRequest) -> Result<String>;
}

/// HTTP transport built on `reqwest`.
///
/// The client is designed to be reused across calls and endpoints; it keeps a
/// connection pool internally.
///
/// # Examples
///
/// ```no_run
/// use quotakey::HttpTransport;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), quotakey::Error> {
/// let transport = HttpTransport::builder()
///     .connect_timeout(Duration::from_secs(60))
///     .read_timeout(Duration::from_secs(10))
///     .default_header("User-Agent", "quotakey/0.1")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    http_client: reqwest::Client,
    default_headers: HeaderMap,
    read_timeout: Duration,
    show_log: bool,
}

impl HttpTransport {
    /// Creates a new `HttpTransportBuilder`.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// Builds a transport from the `[http]` configuration table.
    pub fn from_settings(settings: &HttpSettings) -> Result<Self> {
        Self::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout())
            .show_log(settings.show_log)
            .build()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: &ExchangeRequest) -> Result<String> {
        let url = request.full_url();
        let logged_url = request.redacted_url();

        // Short id to pair request and reply lines in the log
        let request_id = self
            .inner
            .show_log
            .then(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());

        if let Some(request_id) = &request_id {
            tracing::info!(
                request_id = %request_id,
                method = %request.method,
                url = %logged_url,
                body = ?request.body,
                "Sending HTTP request"
            );
        } else {
            tracing::debug!(method = %request.method, url = %logged_url, "Sending HTTP request");
        }

        let mut builder = self.inner.http_client.request(request.method.clone(), url);

        for (name, value) in &self.inner.default_headers {
            builder = builder.header(name, value);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if request.timeout_mode == TimeoutMode::Bounded {
            builder = builder.timeout(self.inner.read_timeout);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let raw_response = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_response,
                "HTTP request returned an error status"
            );
            return Err(Error::HttpError {
                status,
                raw_response,
            });
        }

        if let Some(request_id) = &request_id {
            tracing::info!(
                request_id = %request_id,
                status = status.as_u16(),
                response = %raw_response,
                "Received HTTP response"
            );
        }

        Ok(raw_response)
    }
}

// reqwest errors embed the request URL, key included
fn map_reqwest_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(error.without_url())
    }
}

/// Builder for configuring and creating an [`HttpTransport`].
pub struct HttpTransportBuilder {
    default_headers: HeaderMap,
    connect_timeout: Duration,
    read_timeout: Duration,
    show_log: bool,
}

impl HttpTransportBuilder {
    /// Creates a builder with the default timeouts (60 s connect, 10 s read).
    pub fn new() -> Self {
        let defaults = HttpSettings::default();
        Self {
            default_headers: HeaderMap::new(),
            connect_timeout: defaults.connect_timeout(),
            read_timeout: defaults.read_timeout(),
            show_log: defaults.show_log,
        }
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout applied in [`TimeoutMode::Bounded`].
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Logs every request and reply at `info` level.
    pub fn show_log(mut self, show_log: bool) -> Self {
        self.show_log = show_log;
        self
    }

    /// Builds the configured `HttpTransport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn build(self) -> Result<HttpTransport> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(HttpTransport {
            inner: Arc::new(TransportInner {
                http_client,
                default_headers: self.default_headers,
                read_timeout: self.read_timeout,
                show_log: self.show_log,
            }),
        })
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
