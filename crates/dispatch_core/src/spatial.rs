//! Spatial operations: great-circle distance and H3 cell coverage of a search radius.
//!
//! This module provides:
//!
//! - **Haversine distance** between two WGS84 positions on a spherical earth
//! - **GeoIndex**: the H3 resolution used to bucket drivers, plus the grid disk
//!   that is guaranteed to contain every point within a radius of an origin
//!
//! The spherical approximation is good enough for city-scale dispatch; it is not
//! geodesically exact.

use h3o::{CellIndex, LatLng, Resolution};

use crate::types::Location;

/// Mean earth radius (IUGG), meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Largest grid disk we are willing to enumerate before falling back to a full scan.
const MAX_DISK_K: u32 = 48;

/// Smallest hexagon edge relative to the resolution's average, across the globe.
const MIN_EDGE_RATIO: f64 = 0.6;

/// Great-circle distance in meters.
pub fn haversine_meters(a: Location, b: Location) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_METERS * c
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The cell containing `location`, or `None` for coordinates H3 cannot index.
    pub fn cell_of(&self, location: Location) -> Option<CellIndex> {
        LatLng::new(location.lat, location.lon)
            .ok()
            .map(|ll| ll.to_cell(self.resolution))
    }

    /// Grid distance `k` such that the disk of radius `k` around the origin's cell
    /// contains the cell of every point within `radius_meters` of the origin.
    ///
    /// Returns `None` when the disk would be too large to be worth enumerating.
    pub fn covering_k(&self, radius_meters: f64) -> Option<u32> {
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return None;
        }
        let avg_edge = self.resolution.edge_length_m();
        let min_edge = avg_edge * MIN_EDGE_RATIO;
        // Cell centers sit within one (max) edge of the points they contain, and
        // neighbouring rings are at least 1.5 (min) edges apart.
        let center_span = radius_meters + 2.0 * (avg_edge / MIN_EDGE_RATIO);
        let k = (center_span / (1.5 * min_edge)).ceil() + 1.0;
        (k <= MAX_DISK_K as f64).then_some(k as u32)
    }

    /// Cells covering `radius_meters` around `origin`, or `None` when a full scan is
    /// the better option.
    pub fn covering_disk(&self, origin: Location, radius_meters: f64) -> Option<Vec<CellIndex>> {
        let k = self.covering_k(radius_meters)?;
        let cell = self.cell_of(origin)?;
        Some(cell.grid_disk::<Vec<_>>(k))
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Eight,
        }
    }
}
