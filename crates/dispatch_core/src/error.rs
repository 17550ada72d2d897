//! Error types for the feed-facing store, the match entry point, and configuration.
//!
//! Malformed trip requests are not errors: they come back as a [`MatchResult`]
//! carrying [`ReasonCode::InvalidRequest`].
//!
//! [`MatchResult`]: crate::types::MatchResult
//! [`ReasonCode::InvalidRequest`]: crate::types::ReasonCode::InvalidRequest

use std::path::PathBuf;

use thiserror::Error;

/// A driver record rejected by [`DriverStore::upsert`](crate::store::DriverStore::upsert).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("driver_id cannot be empty")]
    EmptyDriverId,
    #[error("driver {driver_id} has an invalid location ({lat}, {lon})")]
    InvalidLocation {
        driver_id: String,
        lat: f64,
        lon: f64,
    },
    #[error("driver {driver_id} has negative capacity {capacity}")]
    NegativeCapacity { driver_id: String, capacity: i32 },
}

/// Failures of store writes other than record validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("driver {0} is not registered")]
    UnknownDriver(String),
    #[error("driver {driver_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        driver_id: String,
        expected: u64,
        actual: u64,
    },
}

/// Faults surfaced by [`MatchingEngine::match_request`](crate::engine::MatchingEngine::match_request).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The caller's context was cancelled before a result was available.
    #[error("request {0} was cancelled while waiting for a result")]
    Cancelled(String),
    /// The caller's deadline passed while waiting on another caller's computation.
    #[error("request {0} timed out while waiting for a result")]
    TimedOut(String),
    /// The idempotency cache is in an unusable state.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures while loading or validating [`MatchingConfig`](crate::config::MatchingConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
