//! Candidate prefilter: narrows a fleet snapshot to the drivers worth scoring.

use std::cmp::Ordering;

use crate::spatial::haversine_meters;
use crate::store::FleetSnapshot;
use crate::types::{DriverRecord, Location};

/// A driver inside the search radius, with its distance to the trip origin.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    pub record: DriverRecord,
    pub distance_meters: f64,
}

/// Per-request admission rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConstraints {
    pub radius_meters: f64,
    pub min_seats: u32,
}

impl SearchConstraints {
    pub fn new(radius_meters: f64, min_seats: u32) -> Self {
        Self {
            radius_meters,
            min_seats,
        }
    }

    /// Location-independent checks, cheap enough to run while snapshotting.
    pub fn admits(&self, record: &DriverRecord) -> bool {
        record.available && i64::from(record.capacity) >= i64::from(self.min_seats)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Prefilter {
    max_scan: usize,
}

impl Prefilter {
    pub fn new(max_scan: usize) -> Self {
        Self { max_scan }
    }

    pub fn max_scan(&self) -> usize {
        self.max_scan
    }

    /// Drivers within the radius, nearest first (ties by `driver_id`), truncated to
    /// the configured scan size. An empty result is the normal "nobody nearby" case.
    pub fn prefilter(
        &self,
        origin: Location,
        constraints: &SearchConstraints,
        snapshot: &FleetSnapshot,
    ) -> Vec<NearbyDriver> {
        let mut nearby: Vec<NearbyDriver> = snapshot
            .records()
            .iter()
            .filter(|record| constraints.admits(record))
            .filter_map(|record| {
                let distance_meters = haversine_meters(origin, record.location);
                (distance_meters <= constraints.radius_meters).then(|| NearbyDriver {
                    record: record.clone(),
                    distance_meters,
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.driver_id.cmp(&b.record.driver_id))
        });
        nearby.truncate(self.max_scan);
        nearby
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(records: Vec<DriverRecord>) -> FleetSnapshot {
        records.into_iter().collect()
    }

    fn at(id: &str, lat: f64, lon: f64) -> DriverRecord {
        DriverRecord::new(id, Location::new(lat, lon))
    }

    #[test]
    fn orders_by_distance_then_id() {
        let fleet = snapshot(vec![
            at("far", 0.0, 0.02),
            at("b", 0.0, 0.01),
            at("a", 0.0, 0.01),
            at("here", 0.0, 0.0),
        ]);
        let result = Prefilter::new(10).prefilter(
            Location::new(0.0, 0.0),
            &SearchConstraints::new(5_000.0, 1),
            &fleet,
        );
        let ids: Vec<_> = result.iter().map(|n| n.record.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["here", "a", "b", "far"]);
        assert_eq!(result[0].distance_meters, 0.0);
    }

    #[test]
    fn excludes_drivers_outside_radius() {
        let fleet = snapshot(vec![at("near", 0.0, 0.001), at("far", 0.0, 0.1)]);
        let result = Prefilter::new(10).prefilter(
            Location::new(0.0, 0.0),
            &SearchConstraints::new(1_000.0, 1),
            &fleet,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].record.driver_id, "near");
    }

    #[test]
    fn radius_excluding_everyone_is_empty_not_error() {
        let fleet = snapshot(vec![at("far", 10.0, 10.0)]);
        let result = Prefilter::new(10).prefilter(
            Location::new(0.0, 0.0),
            &SearchConstraints::new(100.0, 1),
            &fleet,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn truncates_to_max_scan() {
        let fleet = snapshot(
            (0..20)
                .map(|i| at(&format!("d{i:02}"), 0.0, i as f64 * 0.0001))
                .collect(),
        );
        let result = Prefilter::new(5).prefilter(
            Location::new(0.0, 0.0),
            &SearchConstraints::new(10_000.0, 1),
            &fleet,
        );
        assert_eq!(result.len(), 5);
        assert_eq!(result[4].record.driver_id, "d04");
    }

    #[test]
    fn enforces_availability_and_seats() {
        let fleet = snapshot(vec![
            at("off", 0.0, 0.0).with_available(false),
            at("full", 0.0, 0.0).with_capacity(0),
            at("small", 0.0, 0.0).with_capacity(2),
            at("van", 0.0, 0.0).with_capacity(6),
        ]);
        let prefilter = Prefilter::new(10);
        let origin = Location::new(0.0, 0.0);

        let any = prefilter.prefilter(origin, &SearchConstraints::new(100.0, 1), &fleet);
        assert_eq!(any.len(), 2);

        let group = prefilter.prefilter(origin, &SearchConstraints::new(100.0, 4), &fleet);
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].record.driver_id, "van");
    }
}
