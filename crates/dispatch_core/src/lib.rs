//! Driver-matching candidate engine.
//!
//! Given a trip request and the live state of a fleet, [`MatchingEngine`] returns a
//! ranked, probability-weighted list of candidate drivers. Results are deterministic
//! for a given fleet state and seed, and idempotent per request id.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use dispatch_core::{DriverRecord, DriverStore, Location, MatchingConfig, MatchingEngine, TripRequest};
//!
//! let store = Arc::new(DriverStore::default());
//! store.upsert(DriverRecord::new("driver-1", Location::new(52.5200, 13.4050))).unwrap();
//! store.upsert(DriverRecord::new("driver-2", Location::new(52.5230, 13.4100))).unwrap();
//!
//! let engine = MatchingEngine::new(MatchingConfig::default(), store).unwrap();
//! let request = TripRequest::new("trip-42", Location::new(52.5205, 13.4060), 2).with_seed(7);
//! let result = engine.match_request(&request).unwrap();
//!
//! assert!(result.is_success());
//! assert!((result.probability_sum() - 1.0).abs() < 1e-9);
//! ```
//!
//! # Architecture
//!
//! - [`store`]: driver state store fed by the location feed
//! - [`prefilter`]: radius filter and nearest-first truncation, backed by [`spatial`]
//! - [`scoring`]: weighted desirability score, with pluggable [`eta`] and [`acceptance`]
//! - [`distribution`]: top-K selection and seeded softmax
//! - [`cache`]: idempotency cache with single-flight computation
//! - [`engine`]: the orchestrator tying it together

pub mod acceptance;
pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod eta;
pub mod prefilter;
pub mod scoring;
pub mod spatial;
pub mod stats;
pub mod store;
pub mod types;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use acceptance::{AcceptanceHistory, AcceptanceModel};
pub use cancel::{CallContext, CancelToken};
pub use config::{MatchingConfig, ScoreWeights};
pub use engine::MatchingEngine;
pub use error::{ConfigError, MatchError, StoreError, ValidationError};
pub use eta::{ConstantSpeedEta, EtaEstimator};
pub use store::{DriverStore, FleetSnapshot, UpsertOutcome};
pub use types::{Candidate, DriverRecord, Location, MatchResult, ReasonCode, TripRequest};
