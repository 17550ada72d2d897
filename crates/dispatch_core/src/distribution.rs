//! Distribution builder: turns scored candidates into a probability distribution.
//!
//! 1. Keep the top `max_candidates` by raw score (ties by ascending `driver_id`).
//! 2. Nudge each kept score by a small offset derived from `(seed, driver_id)`, then
//!    take `softmax(score * temperature)`.
//! 3. Order the output by probability (ties by ascending `driver_id`).
//!
//! The offset comes from SHA-256, so the same seed gives the same distribution on
//! every machine and every run.

use std::cmp::Ordering;

use sha2::{Digest, Sha256};

use crate::scoring::ScoredCandidate;
use crate::types::Candidate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionBuilder {
    temperature: f64,
    exploration: f64,
}

impl DistributionBuilder {
    pub fn new(temperature: f64, exploration: f64) -> Self {
        Self {
            temperature,
            exploration,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    pub fn build(
        &self,
        mut candidates: Vec<ScoredCandidate>,
        max_candidates: usize,
        seed: u64,
    ) -> Vec<Candidate> {
        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(max_candidates);
        if candidates.is_empty() {
            return Vec::new();
        }

        let logits: Vec<f64> = candidates
            .iter()
            .map(|c| {
                let perturbed = c.raw_score + self.exploration * exploration_offset(seed, &c.driver_id);
                perturbed * self.temperature
            })
            .collect();
        let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        // The max logit contributes exp(0) = 1, so the total is at least one.
        let total: f64 = weights.iter().sum();

        let mut out: Vec<Candidate> = candidates
            .into_iter()
            .zip(weights)
            .map(|(c, weight)| Candidate {
                driver_id: c.driver_id,
                distance_meters: c.distance_meters,
                eta_seconds: c.eta_seconds,
                raw_score: c.raw_score,
                probability: weight / total,
            })
            .collect();

        out.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        out
    }
}

/// Deterministic pseudo-random value in `[-1, 1)` for a seed and driver.
pub fn exploration_offset(seed: u64, driver_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(driver_id.as_bytes());
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    // Top 53 bits give a uniform double in [0, 1).
    let unit = (u64::from_le_bytes(word) >> 11) as f64 / (1u64 << 53) as f64;
    unit * 2.0 - 1.0
}
