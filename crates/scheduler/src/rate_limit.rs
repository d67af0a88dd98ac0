//! Trailing-window rate limiting for experiment dispatches.
//!
//! The limiter has no store of its own: it counts over the dispatch
//! timestamps the registry already records, so the admission decision can
//! never diverge from actual execution history.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use havoc_core::config::RateLimitConfig;

/// Config-derived rate-limit policy.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    /// Ceiling on dispatch attempts per experiment within the window.
    pub max_per_window: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            max_per_window: cfg.max_experiments_per_hour,
            window: Duration::from_secs(cfg.window_secs),
        }
    }

    /// Whether `recent` dispatches in the trailing window exhaust the limit.
    pub fn exceeded(&self, recent: usize) -> bool {
        self.enabled && recent >= self.max_per_window as usize
    }
}

/// Count timestamps falling inside the trailing window `[now - window, now]`.
pub fn count_in_window(
    history: &VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> usize {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    let cutoff = now - window;
    history.iter().filter(|t| **t >= cutoff && **t <= now).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool, max: u32) -> RateLimitPolicy {
        RateLimitPolicy::from_config(&RateLimitConfig {
            enabled,
            max_experiments_per_hour: max,
            window_secs: 3600,
        })
    }

    #[test]
    fn disabled_policy_never_exceeds() {
        assert!(!policy(false, 1).exceeded(100));
    }

    #[test]
    fn exceeded_at_limit() {
        let p = policy(true, 2);
        assert!(!p.exceeded(0));
        assert!(!p.exceeded(1));
        assert!(p.exceeded(2));
        assert!(p.exceeded(3));
    }

    #[test]
    fn count_in_window_excludes_old_entries() {
        let now = Utc::now();
        let history: VecDeque<_> = [
            now - chrono::Duration::hours(2),
            now - chrono::Duration::minutes(59),
            now - chrono::Duration::minutes(5),
            now,
        ]
        .into_iter()
        .collect();

        let count = count_in_window(&history, now, Duration::from_secs(3600));
        assert_eq!(count, 3);
    }

    #[test]
    fn count_in_window_empty_history() {
        let history = VecDeque::new();
        assert_eq!(count_in_window(&history, Utc::now(), Duration::from_secs(3600)), 0);
    }
}
