//! The admission engine façade.
//!
//! Orchestrates policy resolution, window accounting, counter storage,
//! penalties and the violation journal for each inbound operation. All
//! stateful collaborators are owned by the engine instance, so multiple
//! independently configured engines can coexist in one process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::journal::{ViolationJournal, ViolationRecord};
use crate::penalty::PenaltyTracker;
use crate::policy::PolicyTable;
use crate::store::{CounterStore, MemoryCounterStore};
use crate::window::{self, Decision, WindowKey};

/// Horizon for the degraded-calls health metric.
const DEGRADED_METRIC_WINDOW_MS: u64 = 60_000;

/// The outcome of an admission check, carrying everything the caller needs
/// to emit standard rate-limit headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionResult {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// The policy limit (`X-RateLimit-Limit`). Zero means unlimited.
    pub limit: u32,
    /// Requests left in the current window (`X-RateLimit-Remaining`).
    pub remaining: u32,
    /// When the window resets, epoch seconds (`X-RateLimit-Reset`).
    pub reset_epoch_seconds: u64,
    /// Advisory backoff on denial (`Retry-After`), escalating for repeat
    /// offenders. `None` on admit.
    pub retry_after_ms: Option<u32>,
    /// Name of the policy that governed the decision.
    pub policy_name: String,
    /// True when the preferred store was unavailable and the in-process
    /// fallback counted this call.
    pub degraded: bool,
}

/// Health probe data for the monitoring surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    /// Whether the most recent preferred-store call succeeded.
    pub preferred_store_healthy: bool,
    /// Degraded admission checks within the last minute.
    pub degraded_calls_last_minute: u32,
}

/// Admits or rejects operations against per-identity, per-policy budgets.
///
/// One `check` call per inbound operation; safe to share across request
/// tasks behind an `Arc`. No lock spans the whole engine: each collaborator
/// synchronizes only its own state.
pub struct AdmissionEngine {
    policies: PolicyTable,
    preferred: Arc<dyn CounterStore>,
    fallback: Arc<dyn CounterStore>,
    /// Concrete handle to the engine-owned in-process store, when the
    /// engine created it itself and is responsible for sweeping it.
    fallback_memory: Option<Arc<MemoryCounterStore>>,
    sweep_interval: Duration,
    sweeper_started: Once,
    penalties: PenaltyTracker,
    journal: ViolationJournal,
    preferred_healthy: AtomicBool,
    degraded_at: Mutex<VecDeque<u64>>,
}

impl AdmissionEngine {
    /// Create an engine counting purely in-process.
    ///
    /// Suitable for single-instance deployments and tests; limits are not
    /// shared with other processes.
    pub fn new(policies: PolicyTable, config: EngineConfig) -> Self {
        let memory = Arc::new(MemoryCounterStore::new());
        let store: Arc<dyn CounterStore> = memory.clone();
        let mut engine = Self::with_stores(policies, config, store.clone(), store);
        engine.fallback_memory = Some(memory);
        engine
    }

    /// Create an engine with a preferred shared store and a fresh in-process
    /// fallback.
    pub fn with_store(
        policies: PolicyTable,
        config: EngineConfig,
        preferred: Arc<dyn CounterStore>,
    ) -> Self {
        let memory = Arc::new(MemoryCounterStore::new());
        let mut engine = Self::with_stores(policies, config, preferred, memory.clone());
        engine.fallback_memory = Some(memory);
        engine
    }

    /// Create an engine with both stores injected.
    ///
    /// The caller keeps ownership of the fallback, including responsibility
    /// for running
    /// [`MemoryCounterStore::spawn_sweeper`](crate::store::MemoryCounterStore::spawn_sweeper)
    /// if it is an in-process store. The other constructors own their
    /// fallback and sweep it themselves.
    pub fn with_stores(
        policies: PolicyTable,
        config: EngineConfig,
        preferred: Arc<dyn CounterStore>,
        fallback: Arc<dyn CounterStore>,
    ) -> Self {
        // Half the smallest window keeps entries from outliving their
        // window by more than 1.5x while staying off the hot path.
        let sweep_interval = Duration::from_millis((policies.min_window_ms() / 2).max(1));
        Self {
            policies,
            preferred,
            fallback,
            fallback_memory: None,
            sweep_interval,
            sweeper_started: Once::new(),
            penalties: PenaltyTracker::new(config.penalty),
            journal: ViolationJournal::new(config.journal_capacity),
            preferred_healthy: AtomicBool::new(true),
            degraded_at: Mutex::new(VecDeque::new()),
        }
    }

    /// Start the sweeper for an engine-owned in-process store.
    ///
    /// Deferred to the first `check` because construction happens outside a
    /// runtime; `Once` makes the spawn race-free across request tasks.
    fn start_sweeper(&self) {
        if let Some(memory) = &self.fallback_memory {
            self.sweeper_started.call_once(|| {
                memory.spawn_sweeper(self.sweep_interval);
            });
        }
    }

    /// Decide whether to admit one operation.
    ///
    /// `now_ms` is the caller's clock in epoch milliseconds; passing it in
    /// keeps window math deterministic and testable. Storage failures never
    /// surface here: the engine degrades to the in-process store, and if
    /// both stores fail it fails open. The only error cases are caller
    /// misuse (empty identity, endpoint class with no policy).
    pub async fn check(
        &self,
        identity: &str,
        endpoint_class: &str,
        tier: &str,
        now_ms: u64,
    ) -> Result<AdmissionResult> {
        if identity.is_empty() {
            return Err(EngineError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }

        self.start_sweeper();

        let policy = self.policies.resolve(endpoint_class, tier)?.clone();
        let key = WindowKey::new(&policy, identity, now_ms);

        trace!(
            key = %key,
            policy = %policy.name,
            tier = %tier,
            "Checking admission"
        );

        if policy.is_unlimited() {
            // Unlimited policies keep no counter at all.
            return Ok(AdmissionResult {
                allowed: true,
                limit: 0,
                remaining: u32::MAX,
                reset_epoch_seconds: key.reset_at_ms() / 1000,
                retry_after_ms: None,
                policy_name: policy.name,
                degraded: false,
            });
        }

        let ttl = Duration::from_millis(policy.window_ms);
        let key_str = key.to_string();

        // The fallback is call-scoped: every check retries the preferred
        // store first, so recovery needs no mode switch.
        let (count, degraded) = match self.preferred.increment_and_get(&key_str, ttl).await {
            Ok(outcome) => {
                self.preferred_healthy.store(true, Ordering::Relaxed);
                (outcome.count, false)
            }
            Err(err) => {
                self.preferred_healthy.store(false, Ordering::Relaxed);
                self.note_degraded(now_ms);
                warn!(
                    key = %key_str,
                    error = %err,
                    "Preferred counter store unavailable, degrading to in-process counting"
                );

                match self.fallback.increment_and_get(&key_str, ttl).await {
                    Ok(outcome) => (outcome.count, true),
                    Err(fallback_err) => {
                        // Total outage: admit rather than block all traffic.
                        error!(
                            key = %key_str,
                            preferred_error = %err,
                            fallback_error = %fallback_err,
                            "All counter stores unavailable; failing open"
                        );
                        self.penalties.decay(identity, now_ms);
                        return Ok(AdmissionResult {
                            allowed: true,
                            limit: policy.limit,
                            remaining: policy.limit,
                            reset_epoch_seconds: key.reset_at_ms() / 1000,
                            retry_after_ms: None,
                            policy_name: policy.name,
                            degraded: true,
                        });
                    }
                }
            }
        };

        let decision = window::decide(count, policy.limit);

        let retry_after_ms = match decision {
            Decision::Deny => {
                let delay = self.penalties.record_violation(identity, now_ms);
                self.journal.record(ViolationRecord {
                    identity: identity.to_string(),
                    policy_name: policy.name.clone(),
                    endpoint_class: endpoint_class.to_string(),
                    timestamp_ms: now_ms,
                    count_at_violation: count,
                });
                debug!(
                    key = %key_str,
                    count = count,
                    limit = policy.limit,
                    "Rate limit exceeded"
                );
                Some(delay.as_millis().min(u32::MAX as u128) as u32)
            }
            Decision::Admit => {
                self.penalties.decay(identity, now_ms);
                None
            }
        };

        let counted = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(AdmissionResult {
            allowed: decision == Decision::Admit,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(counted),
            reset_epoch_seconds: key.reset_at_ms() / 1000,
            retry_after_ms,
            policy_name: policy.name,
            degraded,
        })
    }

    /// The most recent denial events, newest first.
    pub fn recent_violations(&self, limit: usize) -> Vec<ViolationRecord> {
        self.journal.recent(limit)
    }

    /// Discard all recorded denial events.
    pub fn clear_violations(&self) {
        self.journal.clear()
    }

    /// Health of the counter storage, as of `now_ms`.
    pub fn health(&self, now_ms: u64) -> StoreHealth {
        let mut degraded_at = self.degraded_at.lock();
        Self::prune_degraded(&mut degraded_at, now_ms);
        StoreHealth {
            preferred_store_healthy: self.preferred_healthy.load(Ordering::Relaxed),
            degraded_calls_last_minute: u32::try_from(degraded_at.len()).unwrap_or(u32::MAX),
        }
    }

    /// The policy table the engine was built with.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    fn note_degraded(&self, now_ms: u64) {
        let mut degraded_at = self.degraded_at.lock();
        degraded_at.push_back(now_ms);
        Self::prune_degraded(&mut degraded_at, now_ms);
    }

    fn prune_degraded(degraded_at: &mut VecDeque<u64>, now_ms: u64) {
        let horizon = now_ms.saturating_sub(DEGRADED_METRIC_WINDOW_MS);
        while degraded_at.front().is_some_and(|&at| at < horizon) {
            degraded_at.pop_front();
        }
    }
}
