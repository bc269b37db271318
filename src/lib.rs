//! # Quotakey - calling quota-limited APIs from scheduled jobs
//!
//! Quotakey lets scheduled jobs call external APIs whose access is metered per
//! API key. Several keys are configured per endpoint; when the remote side says
//! a key's daily quota is used up, the key is retired and the call continues
//! with the next one. All keys are restored once a day.
//!
//! ## Quick Start
//!
//! ```no_run
//! use quotakey::{
//!     ApiConfig, CallEngine, CallRequest, ExtraContext, FieldPolicy, HttpTransport,
//!     ResetScheduler,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quotakey::Error> {
//!     let config = ApiConfig::load("quotakey.toml")?;
//!
//!     // One pool per quota-limited endpoint, restored every night
//!     let pool = Arc::new(config.key_pool("weather")?);
//!     let mut resets = ResetScheduler::from_settings(vec![pool.clone()], &config.key_reset);
//!     resets.start();
//!
//!     let engine = CallEngine::builder()
//!         .endpoint(config.endpoint("weather")?)
//!         .key_pool(pool)
//!         .transport(HttpTransport::from_settings(&config.http)?)
//!         .policy(FieldPolicy::new("code").success_when(["200"]).key_expired_when(["402"]))
//!         .build()?;
//!
//!     let request = CallRequest::get().with_param("location", "101010100");
//!     let outcome = engine.invoke("now", request, &ExtraContext::new()).await;
//!     match outcome.response() {
//!         Some(response) => println!("{:?} after {} attempts", response.data, response.attempts),
//!         None => println!("call failed: {:?}", outcome),
//!     }
//!
//!     resets.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## How a call proceeds
//!
//! - The engine takes the current key from the [`KeyPool`] and sends it under
//!   the configured query parameter.
//! - Each key gets `retry_times + 1` attempts. Transport failures, unparsable
//!   replies and replies the [`CallPolicy`] rejects are retried.
//! - A reply the policy accepts but flags as out of quota expires the key; the
//!   call starts over with the next key.
//! - The call ends with a [`CallOutcome`]: a success, all keys exhausted, or
//!   retries exhausted. Failures never surface as errors.

pub mod config;
mod engine;
mod error;
pub mod job;
pub mod key_pool;
pub mod policy;
mod request;
pub mod reset;
mod response;
pub mod transport;

pub use config::{ApiConfig, EndpointConfig, EndpointSettings, HttpSettings, KeyResetSettings};
pub use engine::{CallEngine, CallEngineBuilder};
pub use error::{Error, Result};
pub use job::{Job, JobParams, JobResult, JobRunner};
pub use key_pool::{Clock, DayBoundary, KeyPool, KeySlot, SystemClock};
pub use policy::{parse_mapping, CallPolicy, ExtraContext, FieldPolicy, Mapping};
pub use request::{CallRequest, ExchangeRequest, TimeoutMode};
pub use reset::ResetScheduler;
pub use response::{CallOutcome, Response};
pub use transport::{HttpTransport, HttpTransportBuilder, Transport};
