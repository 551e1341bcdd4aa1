use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dealwire_common::StageLimits;
use rand::Rng;

pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Backoff for throttled calls: `base * 3^(attempt-1)`, capped at
/// `max_delay`, never shorter than the provider's `retry-after` hint, plus
/// jitter.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    jitter: JitterFn,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(60),
            jitter: Arc::new(random_jitter),
        }
    }

    pub fn from_limits(limits: &StageLimits) -> Self {
        Self::new(limits.max_attempts, limits.base_delay).with_max_delay(limits.max_delay)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter(|_| Duration::ZERO)
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self
            .base_delay
            .saturating_mul(3u32.saturating_pow(exponent))
            .min(self.max_delay);
        let delay = retry_after.map_or(delay, |hint| delay.max(hint));
        delay + (self.jitter)(delay)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

fn random_jitter(_delay: Duration) -> Duration {
    Duration::from_millis(rand::rng().random_range(0..1000))
}
