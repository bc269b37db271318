//! Results of a call through [`crate::CallEngine`].
//!
//! A call never fails with an error once it has started. It ends in one of the
//! [`CallOutcome`] variants; the successful one wraps a [`Response`] carrying
//! the parsed reply together with the key that produced it and timing details.

use crate::policy::Mapping;
use std::time::Duration;

/// A successful reply.
///
/// # Examples
///
/// ```
/// use quotakey::{parse_mapping, Response};
/// use std::time::Duration;
///
/// let response = Response::new(
///     parse_mapping(r#"{"temp": 21}"#).unwrap(),
///     r#"{"temp": 21}"#.to_string(),
///     Some("A".to_string()),
///     2,
///     Duration::from_millis(40),
/// );
///
/// assert_eq!(response["temp"], 21);
/// assert_eq!(response.key.as_deref(), Some("A"));
/// assert!(response.was_retried());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The parsed reply.
    pub data: Mapping,

    /// The raw reply body.
    ///
    /// When the policy recovered a mapping from an unparsable body, this is
    /// that unparsable body.
    pub raw_body: String,

    /// The key the reply was obtained with, if the endpoint needs one.
    pub key: Option<String>,

    /// Attempts made across all keys, this one included.
    pub attempts: usize,

    /// Time from the first attempt until this reply was classified.
    pub latency: Duration,
}

impl Response {
    /// Creates a new `Response`.
    pub fn new(
        data: Mapping,
        raw_body: String,
        key: Option<String>,
        attempts: usize,
        latency: Duration,
    ) -> Self {
        Self {
            data,
            raw_body,
            key,
            attempts,
            latency,
        }
    }

    /// Returns `true` if more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}

impl AsRef<Mapping> for Response {
    fn as_ref(&self) -> &Mapping {
        &self.data
    }
}

impl std::ops::Deref for Response {
    type Target = Mapping;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// How a call ended.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// A reply was classified as a success with a key that is not exhausted.
    Success(Response),

    /// Every key in the pool has reached its quota for today.
    KeyExhausted {
        /// The last parsed reply, typically the one that exhausted the final key.
        last_response: Option<Mapping>,
    },

    /// All attempts with the current key failed and the key is still usable.
    RetriesExhausted {
        /// Attempts made across all keys.
        attempts: usize,
        /// The last parsed reply, if any attempt produced one.
        last_response: Option<Mapping>,
    },

    /// The call could not be made as configured (for example, an unknown
    /// operation name).
    ConfigError(String),
}

impl CallOutcome {
    /// Returns `true` for [`CallOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Returns the successful reply, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            CallOutcome::Success(response) => Some(response),
            _ => None,
        }
    }

    /// Consumes the outcome and returns the successful reply, if any.
    pub fn into_response(self) -> Option<Response> {
        match self {
            CallOutcome::Success(response) => Some(response),
            _ => None,
        }
    }

    /// Returns the last parsed reply, successful or not.
    pub fn last_response(&self) -> Option<&Mapping> {
        match self {
            CallOutcome::Success(response) => Some(&response.data),
            CallOutcome::KeyExhausted { last_response }
            | CallOutcome::RetriesExhausted { last_response, .. } => last_response.as_ref(),
            CallOutcome::ConfigError(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::parse_mapping;

    #[test]
    fn test_last_response() {
        let mapping = parse_mapping(r#"{"code": "500"}"#).unwrap();
        let outcome = CallOutcome::RetriesExhausted {
            attempts: 3,
            last_response: Some(mapping.clone()),
        };
        assert!(!outcome.is_success());
        assert!(outcome.response().is_none());
        assert_eq!(outcome.last_response(), Some(&mapping));

        let outcome = CallOutcome::ConfigError("unknown operation".to_string());
        assert!(outcome.last_response().is_none());
        assert!(outcome.into_response().is_none());
    }

    #[test]
    fn test_single_attempt_not_retried() {
        let response = Response::new(Mapping::new(), "{}".to_string(), None, 1, Duration::ZERO);
        assert!(!response.was_retried());
        assert!(CallOutcome::Success(response).is_success());
    }
}
