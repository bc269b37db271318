//! Scheduled jobs that consume call engines.
//!
//! A [`Job`] wraps one unit of scheduled work, usually one or more
//! [`crate::CallEngine`] calls. [`JobRunner`] looks jobs up by name and runs
//! them on a fixed number of workers, turning every failure into a failed
//! [`JobResult`].

use crate::response::CallOutcome;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Parameters passed to a job run.
pub type JobParams = serde_json::Map<String, Value>;

/// Outcome of a job run.
///
/// # Examples
///
/// ```
/// use quotakey::JobResult;
///
/// let result = JobResult::fail()
///     .with_message("weather sync failed")
///     .add_detail("beijing: all keys exhausted");
///
/// assert_eq!(
///     serde_json::to_string(&result).unwrap(),
///     r#"{"success":false,"message":"weather sync failed","details":["beijing: all keys exhausted"]}"#
/// );
/// assert_eq!(serde_json::to_string(&JobResult::success()).unwrap(), r#"{"success":true}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobResult {
    /// Whether the job did its work.
    pub success: bool,

    /// Short summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Free-form detail lines.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl JobResult {
    /// A successful result with no message.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed result with no message.
    pub fn fail() -> Self {
        Self::default()
    }

    /// Sets the summary message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Appends one detail line.
    pub fn add_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    /// Appends several detail lines.
    pub fn add_details(mut self, details: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.details.extend(details.into_iter().map(Into::into));
        self
    }

    /// Summarizes a call outcome.
    pub fn from_outcome(outcome: &CallOutcome) -> Self {
        match outcome {
            CallOutcome::Success(response) => Self::success()
                .with_message("call succeeded")
                .add_detail(format!("attempts: {}", response.attempts)),
            CallOutcome::KeyExhausted { .. } => {
                Self::fail().with_message("all keys have reached their daily quota")
            }
            CallOutcome::RetriesExhausted { attempts, .. } => {
                Self::fail().with_message(format!("gave up after {} attempts", attempts))
            }
            CallOutcome::ConfigError(message) => Self::fail().with_message(message.clone()),
        }
    }
}

/// One named unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name the job is registered and triggered under.
    fn name(&self) -> &str;

    /// Human-readable description used in logs.
    fn description(&self) -> &str {
        "scheduled job"
    }

    /// Runs the job.
    async fn run(&self, params: &JobParams) -> Result<JobResult>;
}

/// Runs registered jobs by name on a bounded number of workers.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use quotakey::{Job, JobParams, JobResult, JobRunner};
///
/// struct Ping;
///
/// #[async_trait]
/// impl Job for Ping {
///     fn name(&self) -> &str {
///         "ping"
///     }
///
///     async fn run(&self, _params: &JobParams) -> quotakey::Result<JobResult> {
///         Ok(JobResult::success())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let runner = JobRunner::new(4).register(Ping);
/// assert!(runner.execute("ping", &JobParams::new()).await.success);
/// assert!(!runner.execute("pong", &JobParams::new()).await.success);
/// # }
/// ```
#[derive(Clone)]
pub struct JobRunner {
    jobs: HashMap<String, Arc<dyn Job>>,
    permits: Arc<Semaphore>,
    pool_size: usize,
}

impl JobRunner {
    /// Creates a runner executing at most `pool_size` jobs at once (at least one).
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            jobs: HashMap::new(),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Registers a job under its name, replacing any job with the same name.
    pub fn register(self, job: impl Job + 'static) -> Self {
        self.register_shared(Arc::new(job))
    }

    /// Registers a shared job under its name.
    pub fn register_shared(mut self, job: Arc<dyn Job>) -> Self {
        let name = job.name().to_string();
        if self.jobs.insert(name.clone(), job).is_some() {
            tracing::warn!(job = %name, "Replacing previously registered job");
        }
        self
    }

    /// Returns `true` if a job with this name is registered.
    pub fn contains(&self, job_name: &str) -> bool {
        self.jobs.contains_key(job_name)
    }

    /// Maximum number of jobs running at once.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Runs a job and waits for its result.
    ///
    /// Waits for a free worker first. An unknown job name or a job error yields
    /// a failed result.
    pub async fn execute(&self, job_name: &str, params: &JobParams) -> JobResult {
        let Some(job) = self.jobs.get(job_name) else {
            tracing::warn!(job = job_name, "Job is not registered");
            return JobResult::fail().with_message(format!("job '{}' is not registered", job_name));
        };

        let Ok(_permit) = self.permits.acquire().await else {
            return JobResult::fail().with_message("job runner is shut down");
        };

        tracing::info!(job = job_name, description = job.description(), "Job started");
        match job.run(params).await {
            Ok(result) => {
                tracing::info!(
                    job = job_name,
                    description = job.description(),
                    success = result.success,
                    "Job finished"
                );
                result
            }
            Err(e) => {
                tracing::error!(
                    job = job_name,
                    description = job.description(),
                    error = %e,
                    "Job failed"
                );
                JobResult::fail().with_message(e.to_string())
            }
        }
    }

    /// Runs a job on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, job_name: &str, params: JobParams) -> JoinHandle<JobResult> {
        let runner = self.clone();
        let job_name = job_name.to_string();
        tokio::spawn(async move { runner.execute(&job_name, &params).await })
    }
}
