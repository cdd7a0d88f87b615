//! Turnstile - Rate Limiting & Quota Enforcement Engine
//!
//! This crate admits or rejects operations against per-identity, per-policy
//! request budgets, consistently across one or many service instances. It
//! provides an atomic increment-with-expiry counting primitive with two
//! swappable backends (in-process and Redis), fixed-window accounting,
//! tiered per-endpoint policies, escalating penalties for repeat offenders,
//! and call-scoped degradation to in-process counting when the shared store
//! is unavailable.
//!
//! The embedding service calls
//! [`AdmissionEngine::check`](engine::AdmissionEngine::check) once per
//! inbound operation and translates the returned metadata into rate-limit
//! headers; HTTP handling, identity derivation and tier lookup stay with the
//! caller.

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod penalty;
pub mod policy;
pub mod store;
pub mod window;
