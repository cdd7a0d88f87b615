//! Configuration management for the Turnstile engine.

use serde::{Deserialize, Serialize};

/// Tunable settings for an [`AdmissionEngine`](crate::engine::AdmissionEngine).
///
/// The policy table itself is supplied separately (see
/// [`PolicyTable`](crate::policy::PolicyTable)); this covers everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Escalating-penalty settings.
    #[serde(default)]
    pub penalty: PenaltyConfig,

    /// Capacity of the violation journal ring buffer.
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            penalty: PenaltyConfig::default(),
            journal_capacity: default_journal_capacity(),
        }
    }
}

fn default_journal_capacity() -> usize {
    crate::journal::DEFAULT_CAPACITY
}

/// Settings for the escalating-delay penalty applied to repeat offenders.
///
/// The advisory delay for the N-th consecutive violation is
/// `min(base_delay_ms * 2^min(N - 1, cap_exponent), max_delay_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Delay for a first violation, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Cap on the doubling exponent, bounding growth independently of
    /// `max_delay_ms`.
    #[serde(default = "default_cap_exponent")]
    pub cap_exponent: u32,

    /// How long an identity must stay violation-free before its penalty
    /// state resets, in milliseconds.
    #[serde(default = "default_idle_reset_ms")]
    pub idle_reset_ms: u64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            cap_exponent: default_cap_exponent(),
            idle_reset_ms: default_idle_reset_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_cap_exponent() -> u32 {
    6
}

fn default_idle_reset_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.journal_capacity, 1000);
        assert_eq!(config.penalty.base_delay_ms, 1_000);
        assert_eq!(config.penalty.max_delay_ms, 30_000);
        assert_eq!(config.penalty.cap_exponent, 6);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
penalty:
  base_delay_ms: 500
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.penalty.base_delay_ms, 500);
        assert_eq!(config.penalty.max_delay_ms, 30_000);
        assert_eq!(config.journal_capacity, 1000);
    }
}
