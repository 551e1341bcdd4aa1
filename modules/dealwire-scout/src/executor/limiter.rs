use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Diagnostic view of a limiter's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterState {
    pub provider_id: String,
    /// Oldest grant still inside the window.
    pub window_start: Option<Instant>,
    pub tokens_used: u32,
    pub max_per_window: u32,
}

/// Sliding-log limiter: at most `max_per_window` grants in any rolling
/// `window`. The grant log is the only state shared between workers and is
/// only touched under its mutex.
pub struct RateLimiter {
    provider_id: String,
    max_per_window: u32,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(provider_id: impl Into<String>, max_per_window: u32, window: Duration) -> Self {
        Self {
            provider_id: provider_id.into(),
            max_per_window: max_per_window.max(1),
            window,
            grants: Mutex::new(VecDeque::new()),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Wait until a call may be issued and record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                self.prune(&mut grants, now);

                if (grants.len() as u32) < self.max_per_window {
                    grants.push_back(now);
                    return;
                }

                match grants.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn snapshot(&self) -> RateLimiterState {
        let mut grants = self.grants.lock().await;
        self.prune(&mut grants, Instant::now());
        RateLimiterState {
            provider_id: self.provider_id.clone(),
            window_start: grants.front().copied(),
            tokens_used: grants.len() as u32,
            max_per_window: self.max_per_window,
        }
    }

    fn prune(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = grants.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
