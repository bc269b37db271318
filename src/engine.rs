//! Retrying, key-rotating call orchestration.
//!
//! [`CallEngine::invoke`] runs two nested loops. The outer loop walks the key
//! pool: it takes the current key and injects it into the request. The inner
//! loop makes up to `retry_limit + 1` attempts with that key. A reply that the
//! policy classifies as a success but as out of quota expires the key and sends
//! the call back to the outer loop with the next one.

use crate::config::EndpointConfig;
use crate::key_pool::KeyPool;
use crate::policy::{parse_mapping, CallPolicy, ExtraContext, Mapping};
use crate::request::{CallRequest, ExchangeRequest};
use crate::response::{CallOutcome, Response};
use crate::transport::Transport;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Calls the operations of one endpoint with key rotation and retries.
///
/// Cloning is cheap; clones share the endpoint, key pool, transport and policy.
///
/// # Examples
///
/// ```no_run
/// use quotakey::{ApiConfig, CallEngine, CallRequest, ExtraContext, FieldPolicy, HttpTransport};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), quotakey::Error> {
/// let config = ApiConfig::load("quotakey.toml")?;
/// let engine = CallEngine::builder()
///     .endpoint(config.endpoint("weather")?)
///     .key_pool(Arc::new(config.key_pool("weather")?))
///     .transport(HttpTransport::from_settings(&config.http)?)
///     .policy(FieldPolicy::new("code").success_when(["200"]).key_expired_when(["402"]))
///     .build()?;
///
/// let request = CallRequest::get().with_param("location", "101010100");
/// let outcome = engine.invoke("now", request, &ExtraContext::new()).await;
/// if let Some(response) = outcome.response() {
///     println!("{:?}", response.data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    endpoint: Arc<EndpointConfig>,
    key_pool: Option<Arc<KeyPool>>,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn CallPolicy>,
}

impl CallEngine {
    /// Creates a new `CallEngineBuilder`.
    pub fn builder() -> CallEngineBuilder {
        CallEngineBuilder::default()
    }

    /// Name used in logs; defaults to the endpoint name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The endpoint this engine calls.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.inner.endpoint
    }

    /// The key pool, when the endpoint needs a key.
    pub fn key_pool(&self) -> Option<&Arc<KeyPool>> {
        self.inner.key_pool.as_ref()
    }

    /// Calls the operation `api_name`.
    ///
    /// Transport failures, unparsable replies and unsuccessful replies are
    /// retried up to the endpoint's retry limit per key; none of them surface
    /// as errors. `ctx` is handed to every policy hook.
    pub async fn invoke(
        &self,
        api_name: &str,
        request: CallRequest,
        ctx: &ExtraContext,
    ) -> CallOutcome {
        let inner = &self.inner;

        let Some(url) = inner.endpoint.operation_url(api_name) else {
            tracing::error!(
                endpoint = %inner.name,
                api = api_name,
                "Operation is not configured"
            );
            return CallOutcome::ConfigError(format!(
                "endpoint '{}' has no operation '{}'",
                inner.name, api_name
            ));
        };

        let mut exchange = ExchangeRequest::for_call(url.clone(), request);
        let retry_limit = inner.endpoint.retry_limit();
        let start_time = Instant::now();
        let mut attempts = 0;
        let mut last_response: Option<Mapping> = None;

        loop {
            let key = match &inner.key_pool {
                Some(pool) => match pool.acquire().await {
                    Some(key) => {
                        exchange.set_key(pool.key_parameter_name(), &key);
                        Some(key)
                    }
                    None => {
                        tracing::error!(
                            endpoint = %inner.name,
                            api = api_name,
                            "All keys have reached their daily quota"
                        );
                        return CallOutcome::KeyExhausted { last_response };
                    }
                },
                None => None,
            };

            let mut key_expired = false;

            for attempt in 0..=retry_limit {
                attempts += 1;
                let has_next = attempt < retry_limit;

                let raw_body = match inner.transport.exchange(&exchange).await {
                    Ok(body) if !body.is_empty() => body,
                    result => {
                        if let Err(e) = result {
                            tracing::warn!(
                                endpoint = %inner.name,
                                api = api_name,
                                attempt = attempts,
                                error = %e,
                                "Request failed"
                            );
                        }
                        inner.policy.on_result_null(key.as_deref(), &exchange, ctx);
                        if has_next {
                            tracing::warn!(
                                endpoint = %inner.name,
                                api = api_name,
                                retry = attempt + 1,
                                "Empty result, retrying"
                            );
                        }
                        continue;
                    }
                };

                let mapping = match parse_mapping(&raw_body) {
                    Some(mapping) => mapping,
                    None => match inner.policy.on_result_fail_to_map(
                        key.as_deref(),
                        &exchange,
                        &raw_body,
                        ctx,
                    ) {
                        Some(mapping) => mapping,
                        None => {
                            tracing::warn!(
                                endpoint = %inner.name,
                                api = api_name,
                                attempt = attempts,
                                "Reply is not a JSON object"
                            );
                            continue;
                        }
                    },
                };

                if !inner.policy.check_if_result_success(&mapping, ctx) {
                    inner
                        .policy
                        .on_result_fail(key.as_deref(), &exchange, &raw_body, &mapping, ctx);
                    last_response = Some(mapping);
                    continue;
                }

                if let (Some(pool), Some(current)) = (&inner.key_pool, key.as_deref()) {
                    if inner.policy.check_if_key_expire(&mapping, ctx) {
                        if let Err(e) = pool.expire(current).await {
                            tracing::error!(endpoint = %inner.name, error = %e, "Failed to expire key");
                            return CallOutcome::ConfigError(e.to_string());
                        }
                        last_response = Some(mapping);
                        key_expired = true;
                        break;
                    }
                }

                inner
                    .policy
                    .on_success(key.as_deref(), &exchange, &mapping, ctx);

                let latency = start_time.elapsed();
                tracing::debug!(
                    endpoint = %inner.name,
                    api = api_name,
                    attempts = attempts,
                    latency_ms = latency.as_millis(),
                    "Call succeeded"
                );

                return CallOutcome::Success(Response::new(
                    mapping, raw_body, key, attempts, latency,
                ));
            }

            if inner.key_pool.is_none() || !key_expired {
                tracing::warn!(
                    endpoint = %inner.name,
                    api = api_name,
                    attempts = attempts,
                    "Giving up after exhausting retries"
                );
                return CallOutcome::RetriesExhausted {
                    attempts,
                    last_response,
                };
            }
        }
    }
}

/// Builder for configuring and creating a [`CallEngine`].
#[derive(Default)]
pub struct CallEngineBuilder {
    name: Option<String>,
    endpoint: Option<Arc<EndpointConfig>>,
    key_pool: Option<Arc<KeyPool>>,
    transport: Option<Arc<dyn Transport>>,
    policy: Option<Arc<dyn CallPolicy>>,
}

impl CallEngineBuilder {
    /// Sets the name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the endpoint to call.
    pub fn endpoint(mut self, endpoint: impl Into<Arc<EndpointConfig>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the key pool. Required when the endpoint needs a key.
    pub fn key_pool(mut self, key_pool: Arc<KeyPool>) -> Self {
        self.key_pool = Some(key_pool);
        self
    }

    /// Sets the transport.
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    /// Sets a transport shared with other engines.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the classification policy.
    pub fn policy(self, policy: impl CallPolicy + 'static) -> Self {
        self.shared_policy(Arc::new(policy))
    }

    /// Sets a policy shared with other engines.
    pub fn shared_policy(mut self, policy: Arc<dyn CallPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builds the configured `CallEngine`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the endpoint, transport or
    /// policy is missing, or if the endpoint needs a key and no key pool was set.
    pub fn build(self) -> Result<CallEngine> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::ConfigurationError("Endpoint is required".to_string()))?;
        let name = self.name.unwrap_or_else(|| endpoint.name().to_string());

        let transport = self
            .transport
            .ok_or_else(|| Error::ConfigurationError("Transport is required".to_string()))?;
        let policy = self
            .policy
            .ok_or_else(|| Error::ConfigurationError("Policy is required".to_string()))?;

        let key_pool = if endpoint.need_key() {
            let pool = self.key_pool.ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "endpoint '{}' needs a key but no key pool is configured",
                    name
                ))
            })?;
            if let Some(configured) = endpoint.key_parameter_name() {
                if configured != pool.key_parameter_name() {
                    tracing::warn!(
                        endpoint = %name,
                        configured = configured,
                        pool = pool.key_parameter_name(),
                        "Key parameter name differs from the key pool's, using the pool's"
                    );
                }
            }
            Some(pool)
        } else {
            None
        };

        Ok(CallEngine {
            inner: Arc::new(EngineInner {
                name,
                endpoint,
                key_pool,
                transport,
                policy,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointSettings;
    use crate::policy::FieldPolicy;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn exchange(&self, _request: &ExchangeRequest) -> Result<String> {
            Err(Error::Timeout)
        }
    }

    fn endpoint(need_key: bool) -> EndpointConfig {
        let settings = EndpointSettings::new("https://api.example.com")
            .need_key(need_key)
            .with_operation("now", "/now");
        EndpointConfig::from_settings("weather", &settings).unwrap()
    }

    #[test]
    fn test_build_requires_key_pool_when_key_needed() {
        let result = CallEngine::builder()
            .endpoint(endpoint(true))
            .transport(Unreachable)
            .policy(FieldPolicy::new("code"))
            .build();
        assert!(matches!(result, Err(Error::ConfigurationError(msg)) if msg.contains("key pool")));
    }

    #[test]
    fn test_build_requires_transport_and_policy() {
        let result = CallEngine::builder()
            .endpoint(endpoint(false))
            .policy(FieldPolicy::new("code"))
            .build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));

        let result = CallEngine::builder()
            .endpoint(endpoint(false))
            .transport(Unreachable)
            .build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_key_pool_ignored_without_need_key() {
        let pool = Arc::new(KeyPool::new("weather", "key", vec!["A".to_string()]).unwrap());
        let engine = CallEngine::builder()
            .name("weather-now")
            .endpoint(endpoint(false))
            .key_pool(pool)
            .transport(Unreachable)
            .policy(FieldPolicy::new("code"))
            .build()
            .unwrap();
        assert!(engine.key_pool().is_none());
        assert_eq!(engine.name(), "weather-now");
        assert_eq!(engine.endpoint().name(), "weather");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let engine = CallEngine::builder()
            .endpoint(endpoint(false))
            .transport(Unreachable)
            .policy(FieldPolicy::new("code"))
            .build()
            .unwrap();

        let outcome = engine
            .invoke("hourly", CallRequest::get(), &ExtraContext::new())
            .await;
        assert!(matches!(outcome, CallOutcome::ConfigError(msg) if msg.contains("hourly")));
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_retries() {
        let settings = EndpointSettings::new("https://api.example.com")
            .need_key(false)
            .with_retry_times(3)
            .with_operation("now", "/now");
        let engine = CallEngine::builder()
            .endpoint(EndpointConfig::from_settings("weather", &settings).unwrap())
            .transport(Unreachable)
            .policy(FieldPolicy::new("code"))
            .build()
            .unwrap();

        match engine.invoke("now", CallRequest::get(), &ExtraContext::new()).await {
            CallOutcome::RetriesExhausted {
                attempts,
                last_response,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_response.is_none());
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }
}
