//! Process configuration for endpoints, keys, HTTP timeouts and the daily reset.
//!
//! Configuration is read once at startup from TOML. Each `[endpoints.<name>]`
//! table describes one remote API: its base URL, the operations it exposes,
//! the retry bound and, when the API is quota-limited, the keys to rotate.

use crate::key_pool::{hms, DayBoundary, KeyPool};
use crate::{Error, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level configuration document.
///
/// # Examples
///
/// ```
/// use quotakey::ApiConfig;
///
/// let config = ApiConfig::from_toml_str(r#"
///     [endpoints.weather]
///     url = "https://api.example.com"
///     key_parameter_name = "key"
///     keys = ["A", "B"]
///     retry_times = 2
///
///     [endpoints.weather.api]
///     now = "/v7/weather/now"
/// "#).unwrap();
///
/// let endpoint = config.endpoint("weather").unwrap();
/// assert_eq!(endpoint.retry_limit(), 2);
/// assert_eq!(
///     endpoint.operation_url("now").unwrap().as_str(),
///     "https://api.example.com/v7/weather/now"
/// );
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Transport settings shared by every endpoint.
    #[serde(default)]
    pub http: HttpSettings,

    /// Daily reset and day-boundary guard settings.
    #[serde(default)]
    pub key_reset: KeyResetSettings,

    /// Endpoint entries keyed by logical endpoint name.
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointSettings>,
}

impl ApiConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed TOML and
    /// [`Error::ConfigurationError`] for invalid `[key_reset]` settings.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.key_reset.day_boundary()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.as_ref().display(),
            endpoints = config.endpoints.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Returns the raw settings of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if no endpoint has that name.
    pub fn settings(&self, name: &str) -> Result<&EndpointSettings> {
        self.endpoints.get(name).ok_or_else(|| {
            Error::ConfigurationError(format!("endpoint '{}' is not configured", name))
        })
    }

    /// Builds the validated configuration of an endpoint.
    pub fn endpoint(&self, name: &str) -> Result<EndpointConfig> {
        EndpointConfig::from_settings(name, self.settings(name)?)
    }

    /// Builds the key pool of an endpoint, applying the `[key_reset]` guard settings.
    pub fn key_pool(&self, name: &str) -> Result<KeyPool> {
        let pool = KeyPool::from_settings(name, self.settings(name)?)?;
        Ok(pool.with_day_boundary(self.key_reset.day_boundary()?))
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds for requests in bounded timeout mode.
    pub read_timeout_secs: u64,
    /// Log every request and reply at `info` level.
    pub show_log: bool,
}

impl HttpSettings {
    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            read_timeout_secs: 10,
            show_log: false,
        }
    }
}

/// When to restore keys, and how to treat expiry reports around midnight.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyResetSettings {
    /// Local time of the daily reset.
    pub reset_at: NaiveTime,
    /// Whether expiry reports near midnight are ignored.
    pub guard_enabled: bool,
    /// Start of the ignored window.
    pub guard_start: NaiveTime,
    /// End of the ignored window (inclusive).
    pub guard_end: NaiveTime,
    /// How long an ignored expiry report blocks, in milliseconds.
    pub guard_pause_ms: u64,
}

impl KeyResetSettings {
    /// The day-boundary guard described by these settings, if enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the guard is enabled with a zero
    /// pause. Every ignored expiry sends the call back to the same key, so the
    /// pause is what paces those retries.
    pub fn day_boundary(&self) -> Result<Option<DayBoundary>> {
        if !self.guard_enabled {
            return Ok(None);
        }
        if self.guard_pause_ms == 0 {
            return Err(Error::ConfigurationError(
                "key_reset: guard_pause_ms must be greater than zero while guard_enabled".to_string(),
            ));
        }
        Ok(Some(DayBoundary::new(
            self.guard_start,
            self.guard_end,
            Duration::from_millis(self.guard_pause_ms),
        )))
    }
}

impl Default for KeyResetSettings {
    fn default() -> Self {
        let boundary = DayBoundary::default();
        Self {
            reset_at: hms(23, 59, 56),
            guard_enabled: true,
            guard_start: boundary.start,
            guard_end: boundary.end,
            guard_pause_ms: boundary.pause.as_millis() as u64,
        }
    }
}

fn default_need_key() -> bool {
    true
}

/// One `[endpoints.<name>]` table as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    /// Base URL; operation suffixes are appended to it verbatim.
    #[serde(default)]
    pub url: String,

    /// Whether calls must carry a key from the endpoint's key pool.
    #[serde(default = "default_need_key")]
    pub need_key: bool,

    /// Query parameter the key is sent under.
    #[serde(default)]
    pub key_parameter_name: Option<String>,

    /// Keys in rotation order.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Retries per key after the first attempt.
    #[serde(default)]
    pub retry_times: usize,

    /// Operation name to path suffix.
    #[serde(default)]
    pub api: HashMap<String, String>,
}

impl EndpointSettings {
    /// Creates settings for `url` that need a key, with no keys and no operations.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            need_key: true,
            key_parameter_name: None,
            keys: Vec::new(),
            retry_times: 0,
            api: HashMap::new(),
        }
    }

    /// Sets whether a key is required.
    pub fn need_key(mut self, need_key: bool) -> Self {
        self.need_key = need_key;
        self
    }

    /// Sets the key parameter name and the keys to rotate.
    pub fn with_keys(
        mut self,
        key_parameter_name: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.key_parameter_name = Some(key_parameter_name.into());
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the number of retries per key.
    pub fn with_retry_times(mut self, retry_times: usize) -> Self {
        self.retry_times = retry_times;
        self
    }

    /// Adds a named operation.
    pub fn with_operation(mut self, name: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.api.insert(name.into(), suffix.into());
        self
    }
}

/// Validated, immutable configuration of one endpoint.
///
/// Every operation is resolved to its full URL up front, so a call only has to
/// look its operation up by name.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    name: String,
    base_url: Url,
    need_key: bool,
    key_parameter_name: Option<String>,
    operations: HashMap<String, Url>,
    retry_limit: usize,
}

impl EndpointConfig {
    /// Validates endpoint settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the URL is empty, or
    /// [`Error::InvalidUrl`] if the URL or any operation URL does not parse.
    pub fn from_settings(name: &str, settings: &EndpointSettings) -> Result<Self> {
        if settings.url.trim().is_empty() {
            return Err(Error::ConfigurationError(format!(
                "endpoint '{}': url is not set",
                name
            )));
        }

        let base_url = Url::parse(&settings.url)?;
        let operations = settings
            .api
            .iter()
            .map(|(operation, suffix)| {
                let url = Url::parse(&format!("{}{}", settings.url, suffix))?;
                Ok((operation.clone(), url))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            name: name.to_string(),
            base_url,
            need_key: settings.need_key,
            key_parameter_name: settings.key_parameter_name.clone(),
            operations,
            retry_limit: settings.retry_times,
        })
    }

    /// Logical endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL of the endpoint.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether calls must carry a key.
    pub fn need_key(&self) -> bool {
        self.need_key
    }

    /// Configured key parameter name, if any.
    pub fn key_parameter_name(&self) -> Option<&str> {
        self.key_parameter_name.as_deref()
    }

    /// Retries per key after the first attempt.
    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    /// Full URL of a named operation.
    pub fn operation_url(&self, operation: &str) -> Option<&Url> {
        self.operations.get(operation)
    }

    /// Names of all configured operations.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [http]
        read_timeout_secs = 5
        show_log = true

        [key_reset]
        reset_at = "23:50:00"
        guard_pause_ms = 500

        [endpoints.weather]
        url = "https://api.example.com"
        key_parameter_name = "key"
        keys = ["A", "B"]
        retry_times = 2

        [endpoints.weather.api]
        now = "/v7/weather/now"
        daily = "/v7/weather/3d"

        [endpoints.holidays]
        url = "https://holidays.example.com"
        need_key = false

        [endpoints.holidays.api]
        list = "/api/list"
    "#;

    #[test]
    fn test_parse_full_document() {
        let config = ApiConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.http.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(60));
        assert!(config.http.show_log);
        assert_eq!(config.key_reset.reset_at, hms(23, 50, 0));

        let weather = config.endpoint("weather").unwrap();
        assert!(weather.need_key());
        assert_eq!(weather.key_parameter_name(), Some("key"));
        assert_eq!(weather.retry_limit(), 2);
        assert_eq!(weather.operations().count(), 2);
        assert_eq!(
            weather.operation_url("daily").unwrap().as_str(),
            "https://api.example.com/v7/weather/3d"
        );
        assert!(weather.operation_url("hourly").is_none());

        let holidays = config.endpoint("holidays").unwrap();
        assert!(!holidays.need_key());
        assert_eq!(holidays.retry_limit(), 0);
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_toml_str("").unwrap();
        assert_eq!(config.http.read_timeout(), Duration::from_secs(10));
        assert!(!config.http.show_log);
        assert_eq!(config.key_reset.reset_at, hms(23, 59, 56));
        assert_eq!(
            config.key_reset.day_boundary().unwrap(),
            Some(DayBoundary::default())
        );
    }

    #[test]
    fn test_guard_settings() {
        let config = ApiConfig::from_toml_str(SAMPLE).unwrap();
        let boundary = config.key_reset.day_boundary().unwrap().unwrap();
        assert_eq!(boundary.pause, Duration::from_millis(500));

        let disabled = ApiConfig::from_toml_str("[key_reset]\nguard_enabled = false").unwrap();
        assert_eq!(disabled.key_reset.day_boundary().unwrap(), None);
    }

    #[test]
    fn test_zero_guard_pause_rejected() {
        let err = ApiConfig::from_toml_str("[key_reset]\nguard_pause_ms = 0").unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(msg) if msg.contains("guard_pause_ms")));

        // A disabled guard never pauses, so its pause is irrelevant
        let config =
            ApiConfig::from_toml_str("[key_reset]\nguard_enabled = false\nguard_pause_ms = 0")
                .unwrap();
        assert_eq!(config.key_reset.day_boundary().unwrap(), None);

        // Settings built in code are checked when the pool is built
        let mut config = ApiConfig::from_toml_str(SAMPLE).unwrap();
        config.key_reset.guard_pause_ms = 0;
        assert!(matches!(
            config.key_pool("weather"),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_missing_endpoint() {
        let config = ApiConfig::from_toml_str(SAMPLE).unwrap();
        let err = config.endpoint("stocks").unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(msg) if msg.contains("stocks")));
    }

    #[test]
    fn test_empty_url() {
        let settings = EndpointSettings::new("").with_operation("now", "/now");
        let err = EndpointConfig::from_settings("weather", &settings).unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_invalid_url() {
        let settings = EndpointSettings::new("not a url");
        let err = EndpointConfig::from_settings("weather", &settings).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_key_pool_from_config() {
        let config = ApiConfig::from_toml_str(SAMPLE).unwrap();
        let pool = config.key_pool("weather").unwrap();
        assert_eq!(pool.name(), "weather");
        assert_eq!(pool.key_parameter_name(), "key");
        assert_eq!(pool.len(), 2);

        // holidays has neither keys nor a parameter name
        assert!(matches!(
            config.key_pool("holidays"),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_malformed_document() {
        let err = ApiConfig::from_toml_str("[endpoints.weather]\nretry_times = \"two\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ApiConfig::load("/nonexistent/quotakey.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
