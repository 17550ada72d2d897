//! Historical acceptance lookups for the scoring engine.
//!
//! How acceptance history is sourced is a deployment decision, so scoring only sees
//! the [`AcceptanceModel`] trait. [`AcceptanceHistory`] is the in-memory model fed
//! by offer outcomes.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Looks up how likely a driver is to accept an offer.
pub trait AcceptanceModel: Send + Sync {
    /// Acceptance rate in `[0, 1]`, or `None` when the driver has no history.
    fn acceptance_rate(&self, driver_id: &str) -> Option<f64>;
}

/// A model that knows nothing; every driver gets the configured neutral default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl AcceptanceModel for NoHistory {
    fn acceptance_rate(&self, _driver_id: &str) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferTally {
    pub offers: u64,
    pub accepted: u64,
}

/// Offer outcomes per driver, smoothed toward a prior.
///
/// The rate is `(accepted + prior * strength) / (offers + strength)`, so a driver
/// with one rejection does not drop straight to zero.
#[derive(Debug)]
pub struct AcceptanceHistory {
    tallies: RwLock<HashMap<String, OfferTally>>,
    prior: f64,
    strength: f64,
}

impl Default for AcceptanceHistory {
    fn default() -> Self {
        Self::new(0.5, 4.0)
    }
}

impl AcceptanceHistory {
    pub fn new(prior: f64, strength: f64) -> Self {
        Self {
            tallies: RwLock::new(HashMap::new()),
            prior: prior.clamp(0.0, 1.0),
            strength: strength.max(0.0),
        }
    }

    pub fn record_outcome(&self, driver_id: &str, accepted: bool) {
        let mut tallies = self.tallies.write().unwrap_or_else(PoisonError::into_inner);
        let tally = tallies.entry(driver_id.to_string()).or_default();
        tally.offers += 1;
        if accepted {
            tally.accepted += 1;
        }
    }

    pub fn tally(&self, driver_id: &str) -> Option<OfferTally> {
        self.tallies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(driver_id)
            .copied()
    }

    pub fn forget(&self, driver_id: &str) {
        self.tallies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(driver_id);
    }
}

impl AcceptanceModel for AcceptanceHistory {
    fn acceptance_rate(&self, driver_id: &str) -> Option<f64> {
        let tally = self.tally(driver_id)?;
        let denominator = tally.offers as f64 + self.strength;
        if denominator <= 0.0 {
            return None;
        }
        Some((tally.accepted as f64 + self.prior * self.strength) / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_has_no_rate() {
        let history = AcceptanceHistory::default();
        assert_eq!(history.acceptance_rate("nobody"), None);
        assert_eq!(NoHistory.acceptance_rate("nobody"), None);
    }

    #[test]
    fn rate_is_smoothed_toward_prior() {
        let history = AcceptanceHistory::new(0.5, 2.0);
        history.record_outcome("a", false);
        // (0 + 0.5 * 2) / (1 + 2)
        let rate = history.acceptance_rate("a").expect("rate");
        assert!((rate - 1.0 / 3.0).abs() < 1e-12);

        for _ in 0..98 {
            history.record_outcome("a", true);
        }
        let rate = history.acceptance_rate("a").expect("rate");
        assert!(rate > 0.95 && rate <= 1.0);
        assert_eq!(
            history.tally("a"),
            Some(OfferTally {
                offers: 99,
                accepted: 98
            })
        );
    }

    #[test]
    fn zero_strength_uses_raw_ratio() {
        let history = AcceptanceHistory::new(0.5, 0.0);
        history.record_outcome("a", true);
        history.record_outcome("a", false);
        assert_eq!(history.acceptance_rate("a"), Some(0.5));
        history.forget("a");
        assert_eq!(history.acceptance_rate("a"), None);
    }
}
