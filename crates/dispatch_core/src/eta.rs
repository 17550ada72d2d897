//! Pluggable pickup ETA estimation.
//!
//! The scoring engine only needs "given a pickup distance, how long until the driver
//! arrives". [`ConstantSpeedEta`] answers that with an average city speed; a real
//! router can be substituted by implementing [`EtaEstimator`] (closures work too).

/// Estimates pickup time from the driver's distance to the trip origin.
///
/// Implementations must be `Send + Sync` so one estimator can serve concurrent
/// requests, and must be deterministic for identical inputs.
pub trait EtaEstimator: Send + Sync {
    /// Seconds until pickup for a driver `distance_meters` away.
    fn eta_seconds(&self, distance_meters: f64) -> f64;
}

impl<F> EtaEstimator for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn eta_seconds(&self, distance_meters: f64) -> f64 {
        self(distance_meters)
    }
}

/// Straight-line distance over a constant average speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSpeedEta {
    speed_mps: f64,
}

impl ConstantSpeedEta {
    pub fn from_kmh(speed_kmh: f64) -> Self {
        Self {
            speed_mps: speed_kmh * 1_000.0 / 3_600.0,
        }
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}

impl Default for ConstantSpeedEta {
    fn default() -> Self {
        Self::from_kmh(40.0)
    }
}

impl EtaEstimator for ConstantSpeedEta {
    fn eta_seconds(&self, distance_meters: f64) -> f64 {
        if distance_meters <= 0.0 {
            return 0.0;
        }
        distance_meters / self.speed_mps
    }
}
