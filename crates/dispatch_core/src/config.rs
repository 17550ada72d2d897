//! Engine configuration: scoring weights, distribution shape, search defaults, cache policy.
//!
//! Every field has a default, so a config file only needs to name what it overrides:
//!
//! ```
//! use dispatch_core::config::MatchingConfig;
//!
//! let config = MatchingConfig::from_json_str(r#"{ "temperature": 8.0 }"#).unwrap();
//! assert_eq!(config.temperature, 8.0);
//! assert_eq!(config.default_radius_meters, 2_000.0);
//! ```

use std::fs;
use std::path::Path;

use h3o::Resolution;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default search radius when a request does not override it (meters).
const DEFAULT_RADIUS_METERS: f64 = 2_000.0;

/// Upper bound on drivers handed to scoring per request.
const DEFAULT_MAX_SCAN: usize = 256;

/// Average speed for the default ETA estimate (km/h).
const DEFAULT_AVG_SPEED_KMH: f64 = 40.0;

/// Default H3 resolution for the store's cell index (~0.5 km edges).
const DEFAULT_H3_RESOLUTION: u8 = 8;

/// Idempotency entries are kept for five minutes.
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

const DEFAULT_CACHE_CAPACITY: usize = 10_000;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weights of the three score terms. Must be non-negative and sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of `1 / (1 + distance_meters)`.
    pub distance: f64,
    /// Weight of `1 / (1 + eta_seconds)`.
    pub eta: f64,
    /// Weight of the driver's historical acceptance rate.
    pub acceptance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            distance: 0.4,
            eta: 0.4,
            acceptance: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn new(distance: f64, eta: f64, acceptance: f64) -> Self {
        Self {
            distance,
            eta,
            acceptance,
        }
    }

    pub fn sum(&self) -> f64 {
        self.distance + self.eta + self.acceptance
    }
}

/// Retention policy of the idempotency cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: ScoreWeights,
    /// Softmax sharpness: scores are multiplied by this before exponentiation.
    /// Zero yields a uniform distribution; larger values approach winner-take-all.
    pub temperature: f64,
    /// Amplitude of the seeded score perturbation applied before the softmax.
    pub exploration: f64,
    pub default_radius_meters: f64,
    pub max_scan: usize,
    pub average_speed_kmh: f64,
    /// Acceptance rate assumed for drivers without history.
    pub default_acceptance: f64,
    pub h3_resolution: u8,
    pub cache: CacheConfig,
    /// Bound on how long a caller waits for another caller's computation of the
    /// same request id when its own context sets no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            temperature: 4.0,
            exploration: 0.01,
            default_radius_meters: DEFAULT_RADIUS_METERS,
            max_scan: DEFAULT_MAX_SCAN,
            average_speed_kmh: DEFAULT_AVG_SPEED_KMH,
            default_acceptance: 0.5,
            h3_resolution: DEFAULT_H3_RESOLUTION,
            cache: CacheConfig::default(),
            wait_timeout_ms: None,
        }
    }
}

impl MatchingConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_exploration(mut self, exploration: f64) -> Self {
        self.exploration = exploration;
        self
    }

    pub fn with_default_radius_meters(mut self, radius_meters: f64) -> Self {
        self.default_radius_meters = radius_meters;
        self
    }

    pub fn with_max_scan(mut self, max_scan: usize) -> Self {
        self.max_scan = max_scan;
        self
    }

    pub fn with_cache(mut self, ttl_secs: u64, capacity: usize) -> Self {
        self.cache = CacheConfig { ttl_secs, capacity };
        self
    }

    pub fn with_wait_timeout_ms(mut self, wait_timeout_ms: u64) -> Self {
        self.wait_timeout_ms = Some(wait_timeout_ms);
        self
    }

    /// The H3 resolution of the store's cell index.
    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::try_from(self.h3_resolution).map_err(|_| {
            ConfigError::Invalid(format!(
                "h3_resolution must be between 0 and 15, got {}",
                self.h3_resolution
            ))
        })
    }

    /// Average speed in meters per second.
    pub fn average_speed_mps(&self) -> f64 {
        self.average_speed_kmh * 1_000.0 / 3_600.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (name, value) in [
            ("weights.distance", w.distance),
            ("weights.eta", w.eta),
            ("weights.acceptance", w.acceptance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(format!(
                "weights must sum to 1, got {}",
                w.sum()
            )));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(invalid(format!(
                "temperature must be finite and >= 0, got {}",
                self.temperature
            )));
        }
        if !self.exploration.is_finite() || self.exploration < 0.0 {
            return Err(invalid(format!(
                "exploration must be finite and >= 0, got {}",
                self.exploration
            )));
        }
        if !self.default_radius_meters.is_finite() || self.default_radius_meters <= 0.0 {
            return Err(invalid(format!(
                "default_radius_meters must be positive, got {}",
                self.default_radius_meters
            )));
        }
        if self.max_scan == 0 {
            return Err(invalid("max_scan must be a positive integer"));
        }
        if !self.average_speed_kmh.is_finite() || self.average_speed_kmh <= 0.0 {
            return Err(invalid(format!(
                "average_speed_kmh must be positive, got {}",
                self.average_speed_kmh
            )));
        }
        if !(0.0..=1.0).contains(&self.default_acceptance) {
            return Err(invalid(format!(
                "default_acceptance must be within [0, 1], got {}",
                self.default_acceptance
            )));
        }
        self.resolution()?;
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs must be a positive integer"));
        }
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity must be a positive integer"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
