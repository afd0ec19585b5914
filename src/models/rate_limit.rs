use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempt tracking for one identifier (e.g. a vendor username)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTracking {
    /// Attempts counted in the current window
    pub attempt_count: u32,
    /// Unix timestamp (milliseconds) when the current window opened
    pub window_start_ms: i64,
    /// Window length this tracking was opened with
    pub window_ms: i64,
    /// Set once `attempt_count` reaches the limit; cleared when the window elapses
    pub locked: bool,
}

/// Answer returned for every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_attempts: u32,
    /// When the identifier may try again; only set while locked
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitTracking {
    /// Open a fresh window at `now_ms`
    pub fn new(now_ms: i64, window_ms: i64) -> Self {
        Self {
            attempt_count: 0,
            window_start_ms: now_ms,
            window_ms,
            locked: false,
        }
    }

    pub fn window_elapsed(&self, now_ms: i64) -> bool {
        now_ms - self.window_start_ms > self.window_ms
    }

    /// Unix timestamp (milliseconds) when the current window closes
    pub fn reset_at_ms(&self) -> i64 {
        self.window_start_ms + self.window_ms
    }

    /// Count one attempt and decide whether it may proceed
    pub fn check_and_increment(
        &mut self,
        now_ms: i64,
        max_attempts: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        // Reset counters if the window has expired
        if self.window_elapsed(now_ms) {
            *self = Self::new(now_ms, window_ms);
        }

        if self.locked {
            return RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                reset_time: DateTime::from_timestamp_millis(self.reset_at_ms()),
            };
        }

        self.attempt_count += 1;
        if self.attempt_count >= max_attempts {
            self.locked = true;
        }

        RateLimitDecision {
            allowed: true,
            remaining_attempts: max_attempts.saturating_sub(self.attempt_count),
            reset_time: None,
        }
    }
}
