//! Scoring engine: how desirable each nearby driver is for a trip.
//!
//! ```text
//! raw_score = w_distance / (1 + distance_m) + w_eta / (1 + eta_s) + w_acceptance * acceptance
//! ```
//!
//! Scores depend only on their inputs; no clock, no ambient randomness.

use std::sync::Arc;

use crate::acceptance::{AcceptanceModel, NoHistory};
use crate::config::ScoreWeights;
use crate::eta::{ConstantSpeedEta, EtaEstimator};
use crate::prefilter::NearbyDriver;

/// Unweighted score terms, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    pub proximity: f64,
    pub pickup_time: f64,
    pub acceptance: f64,
}

impl ScoreComponents {
    pub fn total(&self, weights: &ScoreWeights) -> f64 {
        weights.distance * self.proximity
            + weights.eta * self.pickup_time
            + weights.acceptance * self.acceptance
    }
}

/// A nearby driver with its score, ready for the distribution builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub driver_id: String,
    pub distance_meters: f64,
    pub eta_seconds: f64,
    pub components: ScoreComponents,
    pub raw_score: f64,
}

#[derive(Clone)]
pub struct ScoringEngine {
    weights: ScoreWeights,
    default_acceptance: f64,
    eta: Arc<dyn EtaEstimator>,
    acceptance: Arc<dyn AcceptanceModel>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("weights", &self.weights)
            .field("default_acceptance", &self.default_acceptance)
            .finish_non_exhaustive()
    }
}

impl ScoringEngine {
    pub fn new(weights: ScoreWeights, default_acceptance: f64) -> Self {
        Self {
            weights,
            default_acceptance,
            eta: Arc::new(ConstantSpeedEta::default()),
            acceptance: Arc::new(NoHistory),
        }
    }

    pub fn with_eta_estimator(mut self, eta: Arc<dyn EtaEstimator>) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_acceptance_model(mut self, acceptance: Arc<dyn AcceptanceModel>) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Pickup ETA from the injected estimator. Negative or NaN estimates count as
    /// an immediate pickup; infinite ones as never.
    fn eta_seconds(&self, distance_meters: f64) -> f64 {
        let eta = self.eta.eta_seconds(distance_meters);
        if eta.is_nan() {
            0.0
        } else {
            eta.max(0.0)
        }
    }

    fn acceptance(&self, driver_id: &str) -> f64 {
        match self.acceptance.acceptance_rate(driver_id) {
            Some(rate) if rate.is_finite() => rate.clamp(0.0, 1.0),
            _ => self.default_acceptance,
        }
    }

    pub fn score(&self, driver: &NearbyDriver) -> ScoredCandidate {
        let distance_meters = driver.distance_meters.max(0.0);
        let eta_seconds = self.eta_seconds(distance_meters);
        let components = ScoreComponents {
            proximity: 1.0 / (1.0 + distance_meters),
            // 1 / (1 + inf) is exactly zero.
            pickup_time: 1.0 / (1.0 + eta_seconds),
            acceptance: self.acceptance(&driver.record.driver_id),
        };
        ScoredCandidate {
            driver_id: driver.record.driver_id.clone(),
            distance_meters,
            eta_seconds,
            raw_score: components.total(&self.weights),
            components,
        }
    }

    pub fn score_all(&self, drivers: &[NearbyDriver]) -> Vec<ScoredCandidate> {
        drivers.iter().map(|driver| self.score(driver)).collect()
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoreWeights::default(), 0.5)
    }
}
