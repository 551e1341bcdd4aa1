//! Bounded, rate-limited fan-out to an external provider.
//!
//! One `Executor` owns one provider budget: a concurrency bound, a rolling
//! window rate limiter and a retry policy for throttled calls. `run_all`
//! always resolves every task and returns results aligned with the inputs.

mod limiter;
mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dealwire_common::StageLimits;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use limiter::{RateLimiter, RateLimiterState};
pub use retry::{JitterFn, RetryPolicy};

/// What a single external call can report back to the executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("throttled by provider")]
    Throttled { retry_after: Option<Duration> },

    #[error("call timed out")]
    TimedOut,

    #[error("{0}")]
    Failed(String),

    #[error("invalid response: {0}")]
    Invalid(String),
}

/// Final outcome of a task that did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("rate limit exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("timed out")]
    TimedOut,

    #[error("{0}")]
    Failed(String),

    #[error("invalid response: {0}")]
    Invalid(String),

    #[error("cancelled")]
    Cancelled,
}

pub struct Executor {
    name: String,
    concurrency: usize,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(name: impl Into<String>, limits: &StageLimits, cancel: CancellationToken) -> Self {
        let name = name.into();
        Self {
            limiter: Arc::new(RateLimiter::new(
                name.clone(),
                limits.max_per_window,
                limits.window,
            )),
            name,
            concurrency: limits.concurrency.max(1),
            retry: RetryPolicy::from_limits(limits),
            call_timeout: limits.call_timeout,
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `task` once per input with at most `concurrency` in flight.
    ///
    /// Each attempt first takes a limiter slot. Throttled attempts are retried
    /// per the retry policy; every other error is final. The returned vector
    /// is index-aligned with `inputs`, whatever the completion order.
    pub async fn run_all<I, T, F, Fut>(&self, inputs: Vec<I>, task: F) -> Vec<Result<T, TaskError>>
    where
        I: Clone + Send,
        T: Send,
        F: Fn(I) -> Fut + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
    {
        let total = inputs.len();
        let mut slots: Vec<Option<Result<T, TaskError>>> = (0..total).map(|_| None).collect();
        let task = &task;

        let mut pending = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| async move { (index, self.execute(input, task).await) })
            .buffer_unordered(self.concurrency);

        while let Some((index, result)) = pending.next().await {
            slots[index] = Some(result);
        }

        debug!(executor = self.name.as_str(), total, "Batch complete");
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(TaskError::Cancelled)))
            .collect()
    }

    async fn execute<I, T, F, Fut>(&self, input: I, task: &F) -> Result<T, TaskError>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                _ = self.limiter.acquire() => {}
            }

            let call = task(input.clone());
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                outcome = with_timeout(self.call_timeout, call) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(CallError::Throttled { retry_after }) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(executor = self.name.as_str(), attempts = attempt, "Rate limit retries exhausted");
                        return Err(TaskError::RateLimitExhausted { attempts: attempt });
                    }
                    let delay = self.retry.backoff(attempt, retry_after);
                    warn!(
                        executor = self.name.as_str(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        "Throttled, retrying after backoff"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(CallError::TimedOut) => return Err(TaskError::TimedOut),
                Err(CallError::Failed(message)) => return Err(TaskError::Failed(message)),
                Err(CallError::Invalid(message)) => return Err(TaskError::Invalid(message)),
            }
        }
    }
}

async fn with_timeout<T, Fut>(limit: Option<Duration>, call: Fut) -> Result<T, CallError>
where
    Fut: Future<Output = Result<T, CallError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(CallError::TimedOut)),
        None => call.await,
    }
}
