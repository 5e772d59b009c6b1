use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Rate limiting error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },
}

impl From<RateLimitError> for crate::Error {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::RateLimitExceeded {
                retry_after_seconds,
            } => Self::RateLimited {
                retry_after_seconds,
            },
        }
    }
}

/// Sliding-window log limiter: at most `max_events` accepted events per key
/// within any `window`.
///
/// Each key keeps its own log of accepted timestamps, so checks for different
/// keys only contend on the map shard.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    max_events: usize,
    window: Duration,
    logs: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events: max_events.max(1),
            window,
            logs: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `key` if the window has room, otherwise report how
    /// long until the oldest accepted event leaves the window.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut log = self.logs.entry(key.to_string()).or_default();

        while log
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            log.pop_front();
        }

        if log.len() >= self.max_events {
            let oldest = log.front().copied().unwrap_or(now);
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError::RateLimitExceeded {
                retry_after_seconds: wait.as_secs_f64().ceil().max(1.0) as u64,
            });
        }

        log.push_back(now);
        Ok(())
    }

    /// Drop the log of a key (e.g. when its last connection goes away)
    pub fn forget(&self, key: &str) {
        self.logs.remove(key);
    }

    /// Remove logs whose events have all left the window
    pub fn prune(&self) {
        prune_logs(&self.logs, self.window);
    }

    /// Prune on a background task every `every`. The task ends once the
    /// limiter and all its clones are gone.
    pub fn spawn_pruner(&self, every: Duration) -> JoinHandle<()> {
        let logs = Arc::downgrade(&self.logs);
        let window = self.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(logs) = logs.upgrade() else {
                    break;
                };
                prune_logs(&logs, window);
            }
        })
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

fn prune_logs(logs: &DashMap<String, VecDeque<Instant>>, window: Duration) {
    let now = Instant::now();
    logs.retain(|_, log| {
        log.back()
            .is_some_and(|newest| now.duration_since(*newest) < window)
    });
}
