//! Escalating penalties for repeat offenders.

use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::config::PenaltyConfig;

/// Per-identity violation state. Owned by the tracker, never shared.
#[derive(Debug, Clone, Copy)]
struct PenaltyState {
    consecutive_violations: u32,
    last_violation_at_ms: u64,
}

/// Tracks consecutive violations per identity and computes an escalating,
/// capped backoff delay.
///
/// The delay is advisory: the caller may sleep before responding with 429 or
/// return immediately with a `Retry-After` header; the tracker only computes
/// the value. State decays to zero once an identity stays violation-free for
/// the configured idle period.
pub struct PenaltyTracker {
    config: PenaltyConfig,
    states: DashMap<String, PenaltyState>,
}

impl PenaltyTracker {
    /// Create a tracker with the given penalty settings.
    pub fn new(config: PenaltyConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Record a violation and return the advisory delay for this offense.
    pub fn record_violation(&self, identity: &str, now_ms: u64) -> Duration {
        let mut entry = self
            .states
            .entry(identity.to_string())
            .or_insert(PenaltyState {
                consecutive_violations: 0,
                last_violation_at_ms: now_ms,
            });

        // Stale streaks restart from scratch.
        if entry.consecutive_violations > 0
            && now_ms.saturating_sub(entry.last_violation_at_ms) >= self.config.idle_reset_ms
        {
            entry.consecutive_violations = 0;
        }

        entry.consecutive_violations = entry.consecutive_violations.saturating_add(1);
        entry.last_violation_at_ms = now_ms;
        let violations = entry.consecutive_violations;
        drop(entry);

        let delay = self.delay_for(violations);
        debug!(
            identity = %identity,
            violations = violations,
            delay_ms = delay.as_millis() as u64,
            "Recorded rate limit violation"
        );
        delay
    }

    /// Drop the identity's state if it has been violation-free long enough.
    ///
    /// Called opportunistically on successful admits so well-behaved
    /// identities do not accumulate tracker entries forever.
    pub fn decay(&self, identity: &str, now_ms: u64) {
        self.states.remove_if(identity, |_, state| {
            now_ms.saturating_sub(state.last_violation_at_ms) >= self.config.idle_reset_ms
        });
    }

    /// Number of identities currently carrying penalty state.
    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    fn delay_for(&self, violations: u32) -> Duration {
        let exponent = violations
            .saturating_sub(1)
            .min(self.config.cap_exponent)
            .min(63);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}
