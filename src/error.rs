//! Error types for the Turnstile engine.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Configuration errors surface at construction time so a misconfigured
/// policy table is caught before any traffic is served. The only variants a
/// caller of [`AdmissionEngine::check`](crate::engine::AdmissionEngine::check)
/// can ever see are [`EngineError::PolicyNotFound`] and
/// [`EngineError::InvalidIdentity`], both of which indicate an integration
/// bug by the caller rather than a runtime condition.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Policy table or engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No policy is configured for the requested endpoint class.
    #[error("No policy configured for endpoint class '{0}'")]
    PolicyNotFound(String),

    /// The caller supplied an identity the engine cannot key on.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, EngineError>;
