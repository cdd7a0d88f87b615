//! Fixed-window accounting: key derivation and admit/deny decisions.
//!
//! All requests sharing a `(policy, identity, window_index)` triple share one
//! counter, and the window resets hard at each boundary. This deliberately
//! permits a burst of up to `2 * limit` requests spanning a boundary; a
//! sliding-window-counter approximation could replace this module later
//! without touching the store or engine contracts.

use crate::policy::Policy;

/// The outcome of comparing a counter value against a policy limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within budget.
    Admit,
    /// The request exceeds budget and must be rejected.
    Deny,
}

/// A key identifying one fixed-window counter in the store.
///
/// Rendered as `rl|{policy}|{identity}|{window_index}` so the same derivation
/// works for both the in-process map and shared storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    policy_name: String,
    identity: String,
    window_index: u64,
    window_ms: u64,
}

impl WindowKey {
    /// Derive the window key for a policy, identity and timestamp.
    pub fn new(policy: &Policy, identity: &str, now_ms: u64) -> Self {
        Self {
            policy_name: policy.name.clone(),
            identity: identity.to_string(),
            window_index: now_ms / policy.window_ms,
            window_ms: policy.window_ms,
        }
    }

    /// The window index this key belongs to.
    pub fn window_index(&self) -> u64 {
        self.window_index
    }

    /// Epoch milliseconds at which this window began.
    pub fn window_start_ms(&self) -> u64 {
        self.window_index * self.window_ms
    }

    /// Epoch milliseconds at which this window resets.
    pub fn reset_at_ms(&self) -> u64 {
        self.window_start_ms() + self.window_ms
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rl|{}|{}|{}",
            self.policy_name, self.identity, self.window_index
        )
    }
}

/// Decide admission from a post-increment counter value.
///
/// The count is taken after the increment, so the request that first crosses
/// the threshold is itself denied and its increment still counts toward the
/// window. A limit of zero means unlimited.
pub fn decide(count: u64, limit: u32) -> Decision {
    if limit == 0 || count <= limit as u64 {
        Decision::Admit
    } else {
        Decision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IdentityStrategy;

    fn test_policy(name: &str, limit: u32, window_ms: u64) -> Policy {
        Policy {
            name: name.to_string(),
            limit,
            window_ms,
            identity_strategy: IdentityStrategy::Ip,
        }
    }

    #[test]
    fn test_same_window_same_key() {
        let policy = test_policy("api-free", 100, 60_000);
        let a = WindowKey::new(&policy, "user-1", 5_000);
        let b = WindowKey::new(&policy, "user-1", 59_999);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_boundary_starts_new_window() {
        let policy = test_policy("api-free", 100, 60_000);
        let before = WindowKey::new(&policy, "user-1", 59_999);
        let after = WindowKey::new(&policy, "user-1", 60_000);
        assert_ne!(before, after);
        assert_eq!(after.window_index(), before.window_index() + 1);
    }

    #[test]
    fn test_key_isolated_per_identity_and_policy() {
        let free = test_policy("api-free", 100, 60_000);
        let pro = test_policy("api-pro", 1_000, 60_000);
        let a = WindowKey::new(&free, "user-1", 1_000);
        let b = WindowKey::new(&free, "user-2", 1_000);
        let c = WindowKey::new(&pro, "user-1", 1_000);
        assert_ne!(a.to_string(), b.to_string());
        assert_ne!(a.to_string(), c.to_string());
    }

    #[test]
    fn test_reset_at_is_window_end() {
        let policy = test_policy("search", 30, 900_000);
        let key = WindowKey::new(&policy, "203.0.113.4", 950_000);
        assert_eq!(key.window_start_ms(), 900_000);
        assert_eq!(key.reset_at_ms(), 1_800_000);
    }

    #[test]
    fn test_decide_count_then_check() {
        assert_eq!(decide(5, 5), Decision::Admit);
        assert_eq!(decide(6, 5), Decision::Deny);
    }

    #[test]
    fn test_decide_unlimited() {
        assert_eq!(decide(1_000_000, 0), Decision::Admit);
    }
}
