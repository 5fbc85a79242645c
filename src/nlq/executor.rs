//! Query Executor
//!
//! Submits validated queries to a backend and always answers with an
//! `ExecutionResult`: backend faults are converted into `ExecutionFailure`
//! values at this boundary instead of propagating.
//!
//! Two backend shapes are supported:
//! - `SqlBackend`: one request/response round-trip (`SyncExecutor`)
//! - `QueryService`: submit, then poll a job until it settles (`PollingExecutor`)

use crate::error::{CopilotError, Result};
use crate::nlq::query::{Row, ValidatedQuery};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    #[serde(rename = "BackendError")]
    Backend,
    #[serde(rename = "TimedOutError")]
    TimedOut,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Backend => "BackendError",
            FailureKind::TimedOut => "TimedOutError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Query text that produced the failure.
    pub query: String,
}

/// Terminal outcome of one execution; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Rows { rows: Vec<Row> },
    Failure(ExecutionFailure),
}

impl ExecutionResult {
    pub fn rows(rows: Vec<Row>) -> Self {
        ExecutionResult::Rows { rows }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>, query: &ValidatedQuery) -> Self {
        ExecutionResult::Failure(ExecutionFailure {
            kind,
            message: message.into(),
            query: query.text().to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Rows { .. })
    }

    pub fn row_count(&self) -> Option<usize> {
        match self {
            ExecutionResult::Rows { rows } => Some(rows.len()),
            ExecutionResult::Failure(_) => None,
        }
    }
}

/// Anything that can execute a validated query.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &ValidatedQuery) -> ExecutionResult;
}

/// Request/response backend, e.g. a SQL warehouse.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Lifecycle of an asynchronous query job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPoll {
    pub status: JobStatus,
    pub results: Option<Vec<Row>>,
    pub error_message: Option<String>,
}

/// Submit-then-poll backend, e.g. a resource-config query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn submit(&self, expression: &str) -> Result<JobId>;

    async fn poll(&self, job: &JobId) -> Result<JobPoll>;
}

pub struct SyncExecutor {
    backend: Arc<dyn SqlBackend>,
}

impl SyncExecutor {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl QueryExecutor for SyncExecutor {
    async fn execute(&self, query: &ValidatedQuery) -> ExecutionResult {
        match self.backend.run_query(query.text()).await {
            Ok(rows) => {
                info!(backend = self.backend.name(), rows = rows.len(), "query executed");
                ExecutionResult::rows(rows)
            }
            Err(CopilotError::TimedOut(message)) => {
                warn!(backend = self.backend.name(), "query timed out: {}", message);
                ExecutionResult::failure(FailureKind::TimedOut, message, query)
            }
            Err(e) => {
                warn!(backend = self.backend.name(), "query failed: {}", e);
                ExecutionResult::failure(FailureKind::Backend, e.to_string(), query)
            }
        }
    }
}

/// Backoff between polls and the hard deadline for one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Floor for every delay between polls.
    pub const MIN_DELAY: Duration = Duration::from_millis(1);

    /// Delay before the first poll.
    pub fn first_delay(&self) -> Duration {
        self.initial_delay.min(self.max_delay).max(Self::MIN_DELAY)
    }

    /// Delay before the next poll, given the previous one.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        previous
            .max(Self::MIN_DELAY)
            .mul_f64(self.multiplier.max(1.0))
            .min(self.max_delay)
            .max(Self::MIN_DELAY)
    }
}

pub struct PollingExecutor {
    service: Arc<dyn QueryService>,
    policy: PollPolicy,
}

impl PollingExecutor {
    pub fn new(service: Arc<dyn QueryService>, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    async fn submit_and_wait(&self, query: &ValidatedQuery, started: Instant) -> ExecutionResult {
        let job = match self.service.submit(query.text()).await {
            Ok(job) => job,
            Err(e) => {
                warn!("query submission failed: {}", e);
                return ExecutionResult::failure(FailureKind::Backend, e.to_string(), query);
            }
        };
        info!(job = %job, "query job submitted");

        let mut delay = self.policy.first_delay();
        let mut polls = 0u32;

        loop {
            polls += 1;
            let poll = match self.service.poll(&job).await {
                Ok(poll) => poll,
                Err(e) => {
                    warn!(job = %job, "polling failed: {}", e);
                    return ExecutionResult::failure(FailureKind::Backend, e.to_string(), query);
                }
            };

            match poll.status {
                JobStatus::Complete => {
                    let rows = poll.results.unwrap_or_default();
                    info!(job = %job, polls, rows = rows.len(), "query job complete");
                    return ExecutionResult::rows(rows);
                }
                JobStatus::Failed => {
                    let message = poll
                        .error_message
                        .unwrap_or_else(|| "query job failed".to_string());
                    warn!(job = %job, polls, "query job failed: {}", message);
                    return ExecutionResult::failure(FailureKind::Backend, message, query);
                }
                JobStatus::Submitted | JobStatus::Running => {}
            }

            // Stop before a sleep would cross the deadline
            if started.elapsed() + delay > self.policy.timeout {
                warn!(job = %job, polls, "query job did not settle in time");
                return self.timed_out(query);
            }

            debug!(job = %job, status = ?poll.status, delay_ms = delay.as_millis() as u64, "query job pending");
            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
        }
    }

    fn timed_out(&self, query: &ValidatedQuery) -> ExecutionResult {
        ExecutionResult::failure(
            FailureKind::TimedOut,
            format!(
                "query job did not complete within {}ms",
                self.policy.timeout.as_millis()
            ),
            query,
        )
    }
}

#[async_trait]
impl QueryExecutor for PollingExecutor {
    async fn execute(&self, query: &ValidatedQuery) -> ExecutionResult {
        // The deadline covers submission and every poll, including calls that stall
        let started = Instant::now();
        match tokio::time::timeout(self.policy.timeout, self.submit_and_wait(query, started)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.policy.timeout.as_millis() as u64, "query service call overran the deadline");
                self.timed_out(query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = PollPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            timeout: Duration::from_secs(1),
        };
        let d1 = policy.next_delay(policy.initial_delay);
        let d2 = policy.next_delay(d1);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(350));
        assert_eq!(policy.next_delay(d2), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_delays_are_floored() {
        let policy = PollPolicy {
            initial_delay: Duration::ZERO,
            ..PollPolicy::default()
        };
        assert_eq!(policy.first_delay(), PollPolicy::MIN_DELAY);
        assert_eq!(policy.next_delay(Duration::ZERO), Duration::from_millis(2));

        let no_max = PollPolicy {
            max_delay: Duration::ZERO,
            ..PollPolicy::default()
        };
        assert_eq!(no_max.first_delay(), PollPolicy::MIN_DELAY);
        assert_eq!(no_max.next_delay(Duration::from_millis(50)), PollPolicy::MIN_DELAY);
    }

    #[test]
    fn test_multiplier_below_one_does_not_shrink() {
        let policy = PollPolicy {
            multiplier: 0.5,
            ..PollPolicy::default()
        };
        assert_eq!(policy.next_delay(Duration::from_millis(300)), Duration::from_millis(300));
    }

    #[test]
    fn test_failure_kind_serializes_to_taxonomy_names() {
        assert_eq!(serde_json::to_value(FailureKind::Backend).unwrap(), "BackendError");
        assert_eq!(serde_json::to_value(FailureKind::TimedOut).unwrap(), "TimedOutError");
        assert_eq!(
            serde_json::from_value::<JobStatus>(serde_json::json!("COMPLETE")).unwrap(),
            JobStatus::Complete
        );
    }
}
