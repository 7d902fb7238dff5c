use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// What to do after a failure was recorded.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Budget left; wait for the backoff and try again.
    Retry {
        attempt: u8,
        history: Vec<RetryAttempt>,
    },
    /// The failure used the last attempt.
    Exhausted { history: Vec<RetryAttempt> },
}

#[derive(Debug, Clone)]
struct RetryState {
    history: Vec<RetryAttempt>,
    last_updated: Instant,
}

/// Counts consecutive failures per key (job handle, dispatch slot).
///
/// A key is exhausted on its `max_attempts`-th failure; a success must call
/// [`RetryTracker::clear`] so the next failure starts from one again.
#[derive(Debug, Default)]
pub struct RetryTracker {
    state: HashMap<String, RetryState>,
    max_attempts: u8,
}

impl RetryTracker {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            state: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Record a failure for `id` and decide whether another attempt is allowed.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let entry = self.state.entry(id.to_string()).or_insert_with(|| RetryState {
            history: Vec::new(),
            last_updated: Instant::now(),
        });

        let attempt = entry.history.len() as u8 + 1;
        entry.last_updated = Instant::now();
        entry.history.push(RetryAttempt::new(attempt, error));

        if attempt < self.max_attempts {
            RetryDecision::Retry {
                attempt,
                history: entry.history.clone(),
            }
        } else {
            let history = self
                .state
                .remove(id)
                .map(|s| s.history)
                .unwrap_or_default();
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.state.remove(id);
    }

    /// Number of failures recorded since the last success.
    pub fn failures(&self, id: &str) -> u8 {
        self.state.get(id).map(|s| s.history.len() as u8).unwrap_or(0)
    }

    /// Remove entries that haven't been updated within `max_age`.
    pub fn cleanup_stale(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.state
            .retain(|_, state| now.duration_since(state.last_updated) < max_age);
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Exponential backoff with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Periodically drop retry entries nobody touched for `max_age`.
pub fn spawn_cleanup_task(
    tracker: Arc<Mutex<RetryTracker>>,
    cleanup_interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);

        loop {
            interval.tick().await;
            let removed = {
                let mut guard = tracker.lock().await;
                let before = guard.len();
                guard.cleanup_stale(max_age);
                before - guard.len()
            };
            if removed > 0 {
                info!(removed, "Cleaned up stale retry entries");
            }
        }
    })
}
