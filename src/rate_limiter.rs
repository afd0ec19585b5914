//! Sliding-window attempt tracker with lockout and a bounded security event log.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_WINDOW_MS, RECENT_FAILURE_WINDOW_MS,
    SECURITY_EVENT_CAPACITY,
};
use crate::models::{RateLimitDecision, RateLimitTracking};

/// Kind of security event recorded in the ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginAttempt,
    LoginFailed,
    AccountLocked,
    RateLimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub identifier: String,
    pub details: String,
}

/// Aggregate view over the event log and tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_events: usize,
    /// `login_failed` events within the last hour
    pub recent_failures: usize,
    /// Identifiers currently locked out
    pub locked_identifiers: usize,
}

/// Rate limiter keyed by identifier
///
/// Tracking entries are mutated under the map's shard lock, so concurrent
/// attempts for the same identifier are counted exactly once each.
#[derive(Debug)]
pub struct RateLimiter {
    tracking: DashMap<String, RateLimitTracking>,
    events: Mutex<VecDeque<SecurityEvent>>,
    max_attempts: u32,
    window_ms: i64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_WINDOW_MS)
    }
}

impl RateLimiter {
    /// Create a limiter with the given defaults for [`RateLimiter::check_limit`]
    pub fn new(max_attempts: u32, window_ms: i64) -> Self {
        Self {
            tracking: DashMap::new(),
            events: Mutex::new(VecDeque::with_capacity(SECURITY_EVENT_CAPACITY)),
            max_attempts,
            window_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check and count an attempt using the configured defaults
    pub fn check_limit(&self, identifier: &str) -> RateLimitDecision {
        self.check_limit_with(identifier, self.max_attempts, self.window_ms)
    }

    pub fn check_limit_with(
        &self,
        identifier: &str,
        max_attempts: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        self.check_limit_at(identifier, max_attempts, window_ms, Utc::now().timestamp_millis())
    }

    /// Must be called on every attempt, including the first.
    pub fn check_limit_at(
        &self,
        identifier: &str,
        max_attempts: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> RateLimitDecision {
        let (decision, newly_locked) = {
            let mut entry = self
                .tracking
                .entry(identifier.to_string())
                .or_insert_with(|| RateLimitTracking::new(now_ms, window_ms));
            let was_locked = entry.locked && !entry.window_elapsed(now_ms);
            let decision = entry.check_and_increment(now_ms, max_attempts, window_ms);
            (decision, !was_locked && entry.locked)
        };

        if !decision.allowed {
            tracing::warn!("Rate limit exceeded for {}", identifier);
            self.log_event_at(
                SecurityEventType::RateLimitExceeded,
                identifier,
                "Attempt rejected while locked out",
                now_ms,
            );
            return decision;
        }

        self.log_event_at(
            SecurityEventType::LoginAttempt,
            identifier,
            &format!("{} attempts remaining", decision.remaining_attempts),
            now_ms,
        );

        if newly_locked {
            tracing::warn!(
                "Identifier {} locked after {} attempts",
                identifier,
                max_attempts
            );
            self.log_event_at(
                SecurityEventType::AccountLocked,
                identifier,
                &format!("Locked for {} ms", window_ms),
                now_ms,
            );
        }

        decision
    }

    /// Log a failed attempt. Counting happens in `check_limit`, not here.
    pub fn record_failure(&self, identifier: &str, details: &str) {
        tracing::info!("Authentication failure for {}: {}", identifier, details);
        self.log_event_at(
            SecurityEventType::LoginFailed,
            identifier,
            details,
            Utc::now().timestamp_millis(),
        );
    }

    /// Forget all tracking for `identifier`
    pub fn record_success(&self, identifier: &str) {
        self.tracking.remove(identifier);
    }

    pub fn tracking(&self, identifier: &str) -> Option<RateLimitTracking> {
        self.tracking.get(identifier).map(|t| t.clone())
    }

    fn log_event_at(
        &self,
        event_type: SecurityEventType,
        identifier: &str,
        details: &str,
        now_ms: i64,
    ) {
        let event = SecurityEvent {
            timestamp: DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now),
            event_type,
            identifier: identifier.to_string(),
            details: details.to_string(),
        };

        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() >= SECURITY_EVENT_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, oldest first
    pub fn events(&self) -> Vec<SecurityEvent> {
        match self.events.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn stats(&self) -> SecurityStats {
        self.stats_at(Utc::now().timestamp_millis())
    }

    pub fn stats_at(&self, now_ms: i64) -> SecurityStats {
        let events = self.events();
        let recent_failures = events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::LoginFailed)
            .filter(|e| now_ms - e.timestamp.timestamp_millis() <= RECENT_FAILURE_WINDOW_MS)
            .count();

        let locked_identifiers = self
            .tracking
            .iter()
            .filter(|t| t.locked && !t.window_elapsed(now_ms))
            .count();

        SecurityStats {
            total_events: events.len(),
            recent_failures,
            locked_identifiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alice_scenario() {
        let limiter = RateLimiter::default();
        let start = 1_700_000_000_000;

        let decisions: Vec<RateLimitDecision> = (0..4)
            .map(|i| limiter.check_limit_at("alice", 3, 1_000, start + i * 100))
            .collect();

        assert!(decisions[..3].iter().all(|d| d.allowed));
        assert_eq!(
            decisions[..3]
                .iter()
                .map(|d| d.remaining_attempts)
                .collect::<Vec<_>>(),
            vec![2, 1, 0]
        );
        assert!(!decisions[3].allowed);
        assert_eq!(
            decisions[3].reset_time,
            DateTime::from_timestamp_millis(start + 1_000)
        );
    }

    #[test]
    fn test_success_resets_budget() {
        let limiter = RateLimiter::new(5, 60_000);
        for _ in 0..5 {
            limiter.check_limit("bob");
        }
        assert!(!limiter.check_limit("bob").allowed);

        limiter.record_success("bob");

        let decision = limiter.check_limit("bob");
        assert!(decision.allowed);
        assert_eq!(decision.remaining_attempts, 4);
    }

    #[test]
    fn test_failure_only_logs() {
        let limiter = RateLimiter::default();
        limiter.record_failure("carol", "bad password");

        assert!(limiter.tracking("carol").is_none());
        let events = limiter.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::LoginFailed);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = RateLimiter::default();
        for _ in 0..3 {
            limiter.check_limit_at("dave", 3, 1_000, 0);
        }
        assert!(!limiter.check_limit_at("dave", 3, 1_000, 10).allowed);
        assert!(limiter.check_limit_at("erin", 3, 1_000, 10).allowed);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let limiter = RateLimiter::new(1_000, 60_000);
        for i in 0..(SECURITY_EVENT_CAPACITY + 25) {
            limiter.record_failure(&format!("user-{}", i), "nope");
        }

        let events = limiter.events();
        assert_eq!(events.len(), SECURITY_EVENT_CAPACITY);
        assert_eq!(events[0].identifier, "user-25");
    }

    #[test]
    fn test_stats() {
        let limiter = RateLimiter::default();
        let now = Utc::now().timestamp_millis();

        for _ in 0..2 {
            limiter.check_limit_at("frank", 2, 60_000, now);
        }
        limiter.check_limit_at("frank", 2, 60_000, now);
        limiter.record_failure("frank", "bad password");

        let stats = limiter.stats_at(now);
        assert_eq!(stats.locked_identifiers, 1);
        assert_eq!(stats.recent_failures, 1);
        // two attempts, one lock, one rejection, one failure
        assert_eq!(stats.total_events, 5);

        let later = limiter.stats_at(now + 60_001);
        assert_eq!(later.locked_identifiers, 0);
    }
}
