//! The matching orchestrator: the single entry point a façade calls.
//!
//! ```text
//! validate ─▶ idempotency cache ─hit──────────────────────────────▶ result
//!                    │miss
//!                    ▼
//!             store snapshot ─▶ prefilter ─▶ scoring ─▶ distribution ─▶ cache ─▶ result
//! ```
//!
//! Malformed requests are answered with `INVALID_REQUEST` before the store or the
//! cache is touched. Per request id the engine moves from pending to cached exactly
//! once; every later call with that id replays the cached result.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::acceptance::AcceptanceModel;
use crate::cache::{IdempotencyCache, ResultSource};
use crate::cancel::CallContext;
use crate::clock::{Clock, MonotonicClock};
use crate::config::MatchingConfig;
use crate::distribution::DistributionBuilder;
use crate::error::{ConfigError, MatchError};
use crate::eta::{ConstantSpeedEta, EtaEstimator};
use crate::prefilter::{Prefilter, SearchConstraints};
use crate::scoring::ScoringEngine;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::store::DriverStore;
use crate::types::{MatchResult, TripRequest};

pub struct MatchingEngine {
    config: MatchingConfig,
    store: Arc<DriverStore>,
    prefilter: Prefilter,
    scorer: ScoringEngine,
    distribution: DistributionBuilder,
    cache: IdempotencyCache,
    stats: EngineStats,
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("config", &self.config)
            .field("drivers", &self.store.len())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

fn build_cache(config: &MatchingConfig, clock: Arc<dyn Clock>) -> IdempotencyCache {
    // `validate` guarantees a non-zero capacity.
    let capacity = NonZeroUsize::new(config.cache.capacity).unwrap_or(NonZeroUsize::MIN);
    IdempotencyCache::with_clock(capacity, Duration::from_secs(config.cache.ttl_secs), clock)
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig, store: Arc<DriverStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let scorer = ScoringEngine::new(config.weights, config.default_acceptance).with_eta_estimator(
            Arc::new(ConstantSpeedEta::from_kmh(config.average_speed_kmh)),
        );
        Ok(Self {
            prefilter: Prefilter::new(config.max_scan),
            distribution: DistributionBuilder::new(config.temperature, config.exploration),
            cache: build_cache(&config, Arc::new(MonotonicClock::new())),
            stats: EngineStats::default(),
            scorer,
            store,
            config,
        })
    }

    /// Replace the default constant-speed ETA with a real router.
    pub fn with_eta_estimator(mut self, eta: Arc<dyn EtaEstimator>) -> Self {
        self.scorer = self.scorer.with_eta_estimator(eta);
        self
    }

    pub fn with_acceptance_model(mut self, acceptance: Arc<dyn AcceptanceModel>) -> Self {
        self.scorer = self.scorer.with_acceptance_model(acceptance);
        self
    }

    /// Use `clock` for cache expiry. Starts from an empty cache.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = build_cache(&self.config, clock);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DriverStore> {
        &self.store
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Match a trip request, waiting on a concurrent computation for the same id
    /// for at most the configured `wait_timeout_ms`.
    pub fn match_request(&self, request: &TripRequest) -> Result<MatchResult, MatchError> {
        self.match_request_with(request, &CallContext::background())
    }

    /// Match a trip request under the caller's cancellation token and deadline.
    ///
    /// `Err` is reserved for abandoned waits and cache faults; every domain outcome,
    /// including malformed input, is an `Ok` result with a reason code.
    pub fn match_request_with(
        &self,
        request: &TripRequest,
        ctx: &CallContext,
    ) -> Result<MatchResult, MatchError> {
        self.stats.record_request();

        let constraints = match self.validate(request) {
            Ok(constraints) => constraints,
            Err(reason) => {
                self.stats.record_invalid();
                debug!(request_id = %request.request_id, reason, "rejecting trip request");
                return Ok(MatchResult::invalid(request.request_id.clone()));
            }
        };

        let ctx = ctx.bounded_by(self.config.wait_timeout_ms.map(Duration::from_millis));
        let outcome = self.cache.get_or_compute(
            &request.request_id,
            fingerprint(request),
            &ctx,
            || self.run_pipeline(request, constraints),
        )?;

        match outcome.source {
            ResultSource::Cached => self.stats.record_cache_hit(),
            ResultSource::Coalesced => self.stats.record_coalesced(),
            ResultSource::Computed => {}
        }
        Ok(MatchResult::clone(&outcome.result))
    }

    fn validate(&self, request: &TripRequest) -> Result<SearchConstraints, &'static str> {
        if request.request_id.trim().is_empty() {
            return Err("request_id is empty");
        }
        if request.max_candidates == 0 {
            return Err("max_candidates must be positive");
        }
        if !request.origin.is_valid() {
            return Err("origin is not a valid WGS84 position");
        }
        let radius_meters = request
            .radius_meters
            .unwrap_or(self.config.default_radius_meters);
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err("radius_meters must be positive");
        }
        let min_seats = request.min_seats.unwrap_or(1);
        if min_seats == 0 {
            return Err("min_seats must be positive");
        }
        Ok(SearchConstraints::new(radius_meters, min_seats))
    }

    fn run_pipeline(&self, request: &TripRequest, constraints: SearchConstraints) -> MatchResult {
        self.stats.record_computation();

        let snapshot = self
            .store
            .snapshot_near(request.origin, constraints.radius_meters, |record| {
                constraints.admits(record)
            });
        let nearby = self
            .prefilter
            .prefilter(request.origin, &constraints, &snapshot);
        let scored = self.scorer.score_all(&nearby);
        let candidates =
            self.distribution
                .build(scored, request.max_candidates as usize, request.seed);

        if candidates.is_empty() {
            self.stats.record_no_drivers();
            info!(
                request_id = %request.request_id,
                radius_meters = constraints.radius_meters,
                "no drivers within radius"
            );
            return MatchResult::no_drivers(request.request_id.clone());
        }

        debug!(
            request_id = %request.request_id,
            scanned = snapshot.len(),
            in_radius = nearby.len(),
            returned = candidates.len(),
            "matched trip request"
        );
        MatchResult::matched(request.request_id.clone(), candidates)
    }
}

/// Stable digest of a request's payload, used to spot reused request ids.
pub fn fingerprint(request: &TripRequest) -> Option<String> {
    let bytes = serde_json::to_vec(request).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Some(format!("{:x}", hasher.finalize()))
}
