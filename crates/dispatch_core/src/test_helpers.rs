//! Test helpers for building fleets and instrumented collaborators.
//!
//! Shared by unit tests, integration tests, and benchmarks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MatchingConfig;
use crate::engine::MatchingEngine;
use crate::eta::{ConstantSpeedEta, EtaEstimator};
use crate::spatial::EARTH_RADIUS_METERS;
use crate::store::DriverStore;
use crate::types::{DriverRecord, Location};

/// Alexanderplatz, Berlin. A convenient city-center origin.
pub const TEST_ORIGIN: Location = Location::new(52.5219, 13.4132);

/// An available four-seat driver at `(lat, lon)`.
pub fn driver(id: &str, lat: f64, lon: f64) -> DriverRecord {
    DriverRecord::new(id, Location::new(lat, lon))
}

/// The point `meters` due east of `origin` (small-distance approximation).
pub fn offset_east(origin: Location, meters: f64) -> Location {
    let dlon = (meters / (EARTH_RADIUS_METERS * origin.lat.to_radians().cos())).to_degrees();
    Location::new(origin.lat, origin.lon + dlon)
}

/// The point `meters` due north of `origin`.
pub fn offset_north(origin: Location, meters: f64) -> Location {
    let dlat = (meters / EARTH_RADIUS_METERS).to_degrees();
    Location::new(origin.lat + dlat, origin.lon)
}

/// `count` drivers scattered uniformly in a square of `spread_meters` around `center`.
/// About one in five is unavailable. Reproducible for a given seed.
pub fn random_fleet(seed: u64, count: usize, center: Location, spread_meters: f64) -> Vec<DriverRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let north = rng.gen_range(-spread_meters..=spread_meters);
            let east = rng.gen_range(-spread_meters..=spread_meters);
            let location = offset_east(offset_north(center, north), east);
            DriverRecord::new(format!("driver-{i:05}"), location)
                .with_available(rng.gen_bool(0.8))
                .with_capacity(rng.gen_range(0..=6))
                .with_last_updated(i as u64)
        })
        .collect()
}

/// A store pre-loaded with `records`.
///
/// # Panics
///
/// Panics if any record is invalid.
pub fn store_with(records: impl IntoIterator<Item = DriverRecord>) -> Arc<DriverStore> {
    let store = Arc::new(DriverStore::default());
    for record in records {
        store.upsert(record).expect("test driver should be valid");
    }
    store
}

/// An engine with default config over `store`.
///
/// # Panics
///
/// Panics if the default config is invalid (should never happen).
pub fn engine_with(store: Arc<DriverStore>) -> MatchingEngine {
    MatchingEngine::new(MatchingConfig::default(), store).expect("default config should be valid")
}

/// Constant-speed ETA that counts its calls and can be slowed down.
#[derive(Debug, Default)]
pub struct CountingEta {
    calls: AtomicUsize,
    delay: Duration,
    inner: ConstantSpeedEta,
}

impl CountingEta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EtaEstimator for CountingEta {
    fn eta_seconds(&self, distance_meters: f64) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.inner.eta_seconds(distance_meters)
    }
}
