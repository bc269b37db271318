//! Reply classification supplied by each integration.
//!
//! The engine knows nothing about what a "good" reply looks like for a given
//! API. A [`CallPolicy`] decides whether a parsed reply is a success and
//! whether it signals that the current key ran out of quota, and receives a
//! callback for every outcome of every attempt.

use crate::request::ExchangeRequest;
use serde_json::Value;

/// A parsed reply body: a JSON object.
pub type Mapping = serde_json::Map<String, Value>;

/// Caller data handed to every policy hook and never sent over the wire.
pub type ExtraContext = serde_json::Map<String, Value>;

/// Parses a reply body into a [`Mapping`].
///
/// Returns `None` for empty text, malformed JSON, or JSON that is not an object.
///
/// # Examples
///
/// ```
/// use quotakey::parse_mapping;
///
/// assert!(parse_mapping(r#"{"code": "200"}"#).is_some());
/// assert!(parse_mapping("[1, 2]").is_none());
/// assert!(parse_mapping("<html>").is_none());
/// assert!(parse_mapping("").is_none());
/// ```
pub fn parse_mapping(text: &str) -> Option<Mapping> {
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mapping)) => Some(mapping),
        _ => None,
    }
}

/// Classification and callbacks for one integration.
///
/// Only the two checks are required; the callbacks default to doing nothing.
/// `key` is `None` for endpoints that do not need a key. `request` is exactly
/// what was sent, key included.
///
/// The key-expiry check is only consulted for replies that already passed
/// [`CallPolicy::check_if_result_success`], so an "out of quota" reply must be
/// classified as a success to trigger rotation.
///
/// # Examples
///
/// ```
/// use quotakey::{CallPolicy, ExtraContext, Mapping};
///
/// struct Weather;
///
/// impl CallPolicy for Weather {
///     fn check_if_key_expire(&self, response: &Mapping, _ctx: &ExtraContext) -> bool {
///         response.get("code").and_then(|c| c.as_str()) == Some("402")
///     }
///
///     fn check_if_result_success(&self, response: &Mapping, _ctx: &ExtraContext) -> bool {
///         matches!(response.get("code").and_then(|c| c.as_str()), Some("200" | "402"))
///     }
/// }
/// ```
pub trait CallPolicy: Send + Sync {
    /// Returns `true` if a successful reply says the key's quota is used up.
    fn check_if_key_expire(&self, response: &Mapping, ctx: &ExtraContext) -> bool;

    /// Returns `true` if the reply counts as a success.
    fn check_if_result_success(&self, response: &Mapping, ctx: &ExtraContext) -> bool;

    /// Called when an attempt produced no reply (transport failure or empty body).
    fn on_result_null(&self, key: Option<&str>, request: &ExchangeRequest, ctx: &ExtraContext) {
        let _ = (key, request, ctx);
    }

    /// Called when a reply could not be parsed. Returning a mapping recovers
    /// the attempt; `None` keeps retrying.
    fn on_result_fail_to_map(
        &self,
        key: Option<&str>,
        request: &ExchangeRequest,
        raw_body: &str,
        ctx: &ExtraContext,
    ) -> Option<Mapping> {
        let _ = (key, request, raw_body, ctx);
        None
    }

    /// Called when a parsed reply is not a success.
    fn on_result_fail(
        &self,
        key: Option<&str>,
        request: &ExchangeRequest,
        raw_body: &str,
        response: &Mapping,
        ctx: &ExtraContext,
    ) {
        let _ = (key, request, raw_body, response, ctx);
    }

    /// Called once with the reply that ends the call successfully.
    fn on_success(
        &self,
        key: Option<&str>,
        request: &ExchangeRequest,
        response: &Mapping,
        ctx: &ExtraContext,
    ) {
        let _ = (key, request, response, ctx);
    }
}

/// Classifies replies by a single status field.
///
/// Replies whose field matches one of the success values are successes; those
/// matching a key-expired value are successes that also expire the key. String
/// and numeric field values are compared by their textual form.
///
/// # Examples
///
/// ```
/// use quotakey::{CallPolicy, ExtraContext, FieldPolicy, parse_mapping};
///
/// let policy = FieldPolicy::new("code")
///     .success_when(["200"])
///     .key_expired_when(["402"]);
/// let ctx = ExtraContext::new();
///
/// let quota = parse_mapping(r#"{"code": 402}"#).unwrap();
/// assert!(policy.check_if_result_success(&quota, &ctx));
/// assert!(policy.check_if_key_expire(&quota, &ctx));
///
/// let denied = parse_mapping(r#"{"code": "401"}"#).unwrap();
/// assert!(!policy.check_if_result_success(&denied, &ctx));
/// ```
#[derive(Debug, Clone)]
pub struct FieldPolicy {
    field: String,
    success_values: Vec<String>,
    key_expired_values: Vec<String>,
}

impl FieldPolicy {
    /// Creates a policy reading `field`, with no success or expiry values yet.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            success_values: Vec::new(),
            key_expired_values: Vec::new(),
        }
    }

    /// Adds values that mark a reply as a success.
    pub fn success_when(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.success_values.extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds values that mark the key as out of quota.
    pub fn key_expired_when(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.key_expired_values
            .extend(values.into_iter().map(Into::into));
        self
    }

    fn field_value(&self, response: &Mapping) -> Option<String> {
        match response.get(&self.field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl CallPolicy for FieldPolicy {
    fn check_if_key_expire(&self, response: &Mapping, _ctx: &ExtraContext) -> bool {
        self.field_value(response)
            .is_some_and(|value| self.key_expired_values.contains(&value))
    }

    fn check_if_result_success(&self, response: &Mapping, _ctx: &ExtraContext) -> bool {
        self.field_value(response).is_some_and(|value| {
            self.success_values.contains(&value) || self.key_expired_values.contains(&value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping_whitespace() {
        assert!(parse_mapping("   \n").is_none());
        assert_eq!(parse_mapping(r#" {"a": 1} "#).unwrap()["a"], 1);
    }

    #[test]
    fn test_field_policy_missing_field() {
        let policy = FieldPolicy::new("code").success_when(["200"]);
        let response = parse_mapping(r#"{"status": "200"}"#).unwrap();
        let ctx = ExtraContext::new();
        assert!(!policy.check_if_result_success(&response, &ctx));
        assert!(!policy.check_if_key_expire(&response, &ctx));
    }

    #[test]
    fn test_field_policy_bool_values() {
        let policy = FieldPolicy::new("ok").success_when(["true"]);
        let ctx = ExtraContext::new();
        let ok = parse_mapping(r#"{"ok": true}"#).unwrap();
        let not_ok = parse_mapping(r#"{"ok": false}"#).unwrap();
        assert!(policy.check_if_result_success(&ok, &ctx));
        assert!(!policy.check_if_result_success(&not_ok, &ctx));
    }
}
