//! Request types: what a caller asks for, and what the transport executes.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// How long a single exchange may wait for the remote side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutMode {
    /// Apply the transport's read timeout.
    #[default]
    Bounded,
    /// Wait for the reply without a read timeout.
    Unbounded,
}

/// The caller's part of a call: method, headers, query parameters and body.
///
/// The endpoint URL and, for quota-limited endpoints, the key parameter are
/// filled in by [`crate::CallEngine`].
///
/// # Examples
///
/// ```
/// use quotakey::CallRequest;
///
/// let request = CallRequest::get()
///     .with_param("location", "101010100")
///     .with_header("Accept-Language", "en")
///     .unwrap();
/// assert_eq!(request.params["location"], "101010100");
/// ```
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// The HTTP method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// Query parameters.
    pub params: HashMap<String, String>,

    /// Optional JSON body.
    pub body: Option<Value>,

    /// Timeout behaviour of every attempt.
    pub timeout_mode: TimeoutMode,
}

impl CallRequest {
    /// Creates an empty request with the given method.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            body: None,
            timeout_mode: TimeoutMode::Bounded,
        }
    }

    /// Creates an empty GET request.
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// Creates an empty POST request.
    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn with_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    /// Sets a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` and sets it as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SerializationFailed`] if `body` cannot be encoded.
    pub fn with_json_body<T: Serialize>(self, body: &T) -> Result<Self, crate::Error> {
        let body = serde_json::to_value(body)
            .map_err(|e| crate::Error::SerializationFailed(e.to_string()))?;
        Ok(self.with_body(body))
    }

    /// Sets the timeout behaviour.
    pub fn with_timeout_mode(mut self, timeout_mode: TimeoutMode) -> Self {
        self.timeout_mode = timeout_mode;
        self
    }
}

impl Default for CallRequest {
    fn default() -> Self {
        Self::get()
    }
}

/// A fully resolved request, handed to [`crate::Transport::exchange`].
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    /// The HTTP method.
    pub method: Method,

    /// Operation URL, without query parameters.
    pub url: Url,

    /// Request headers.
    pub headers: HeaderMap,

    /// Query parameters, including the key when one is required.
    pub query_params: HashMap<String, String>,

    /// Optional JSON body.
    pub body: Option<Value>,

    /// Timeout behaviour of this exchange.
    pub timeout_mode: TimeoutMode,

    /// Query parameter holding the key, if one was injected.
    pub key_parameter: Option<String>,
}

impl ExchangeRequest {
    /// Creates an exchange with no headers, parameters or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self::for_call(url, CallRequest::new(method))
    }

    /// Resolves a caller's request against an operation URL.
    pub fn for_call(url: Url, request: CallRequest) -> Self {
        Self {
            method: request.method,
            url,
            headers: request.headers,
            query_params: request.params,
            body: request.body,
            timeout_mode: request.timeout_mode,
            key_parameter: None,
        }
    }

    /// Injects `key` under the query parameter `name` and remembers the
    /// parameter so it can be masked in logs.
    pub fn set_key(&mut self, name: &str, key: &str) {
        self.set_query_param(name, key);
        self.key_parameter = Some(name.to_string());
    }

    /// Adds or replaces a query parameter.
    pub fn set_query_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query_params.insert(key.into(), value.into());
    }

    /// Returns a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// The operation URL with every query parameter appended, sorted by name.
    ///
    /// # Examples
    ///
    /// ```
    /// use http::Method;
    /// use quotakey::ExchangeRequest;
    ///
    /// let mut request = ExchangeRequest::new(
    ///     Method::GET,
    ///     "https://api.example.com/now".parse().unwrap(),
    /// );
    /// request.set_query_param("location", "beijing");
    /// request.set_query_param("key", "A");
    /// assert_eq!(
    ///     request.full_url().as_str(),
    ///     "https://api.example.com/now?key=A&location=beijing"
    /// );
    /// ```
    pub fn full_url(&self) -> Url {
        self.build_url(false)
    }

    /// Like [`ExchangeRequest::full_url`], with the key value replaced by `***`.
    ///
    /// # Examples
    ///
    /// ```
    /// use http::Method;
    /// use quotakey::ExchangeRequest;
    ///
    /// let mut request = ExchangeRequest::new(
    ///     Method::GET,
    ///     "https://api.example.com/now".parse().unwrap(),
    /// );
    /// request.set_key("key", "secret");
    /// assert_eq!(
    ///     request.redacted_url().as_str(),
    ///     "https://api.example.com/now?key=***"
    /// );
    /// ```
    pub fn redacted_url(&self) -> Url {
        self.build_url(true)
    }

    fn build_url(&self, redact_key: bool) -> Url {
        let mut url = self.url.clone();
        if !self.query_params.is_empty() {
            let mut params: Vec<_> = self.query_params.iter().collect();
            params.sort();
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                let masked = redact_key && self.key_parameter.as_deref() == Some(name.as_str());
                pairs.append_pair(name, if masked { "***" } else { value });
            }
        }
        url
    }
}
