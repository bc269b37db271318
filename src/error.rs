//! Error types for key pools, configuration and transport.
//!
//! The call engine never surfaces these to its callers during a call: transport
//! and application failures are folded into [`crate::CallOutcome`]. They appear
//! directly when loading configuration, building components, or when a
//! [`crate::Transport`] implementation reports a failed exchange.

use http::StatusCode;

/// The main error type of the crate.
///
/// # Examples
///
/// ```
/// use quotakey::{ApiConfig, Error};
///
/// let config = ApiConfig::from_toml_str("[endpoints]").unwrap();
/// match config.endpoint("weather") {
///     Err(Error::ConfigurationError(message)) => assert!(message.contains("weather")),
///     other => panic!("unexpected: {:?}", other.map(|_| ())),
/// }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection failed, DNS lookup failed, etc.).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request did not complete within the bounded read timeout.
    #[error("Request timed out")]
    Timeout,

    /// The remote side answered with a non-2xx status code.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
    },

    /// Invalid or incomplete configuration.
    ///
    /// Covers missing endpoints, missing operations, empty key lists, a missing
    /// key parameter name and endpoints that need a key but have no key pool.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The configuration file is not valid TOML for [`crate::ApiConfig`].
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invalid URL was configured.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// [`crate::KeyPool::expire`] was called with a key the pool never handed out.
    #[error("Key pool '{pool}' has no key '{key}'")]
    KeyNotFound {
        /// Name of the pool
        pool: String,
        /// The offending key
        key: String,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),
}

impl Error {
    /// Returns `true` if this error came out of a single transport exchange.
    ///
    /// The call engine treats all of these as an empty result and retries.
    ///
    /// # Examples
    ///
    /// ```
    /// use quotakey::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::BAD_GATEWAY,
    ///     raw_response: "upstream down".to_string(),
    /// };
    /// assert!(err.is_transport_failure());
    /// assert!(!Error::ConfigurationError("no keys".to_string()).is_transport_failure());
    /// ```
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout | Error::HttpError { .. }
        )
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
