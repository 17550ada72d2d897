//! Request, response, and fleet record types shared by every stage of the pipeline.
//!
//! All types are plain data and serialize with serde so a façade can move them over
//! whatever wire format it likes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when both coordinates are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Latest known state of one driver, as reported by the location feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: String,
    pub location: Location,
    pub available: bool,
    /// Feed timestamp in milliseconds. Monotonic per driver.
    pub last_updated: u64,
    /// Seats remaining.
    pub capacity: i32,
    /// Assigned by the store on every accepted write; ignored on input.
    #[serde(default)]
    pub version: u64,
}

impl DriverRecord {
    pub fn new(driver_id: impl Into<String>, location: Location) -> Self {
        Self {
            driver_id: driver_id.into(),
            location,
            available: true,
            last_updated: 0,
            capacity: 4,
            version: 0,
        }
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_capacity(mut self, capacity: i32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_last_updated(mut self, last_updated: u64) -> Self {
        self.last_updated = last_updated;
        self
    }
}

/// A decoded request for match candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    /// Idempotency key.
    pub request_id: String,
    pub origin: Location,
    pub max_candidates: u32,
    #[serde(default)]
    pub seed: u64,
    /// Search radius override; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
    /// Minimum seats a driver must have left. Defaults to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_seats: Option<u32>,
}

impl TripRequest {
    pub fn new(request_id: impl Into<String>, origin: Location, max_candidates: u32) -> Self {
        Self {
            request_id: request_id.into(),
            origin,
            max_candidates,
            seed: 0,
            radius_meters: None,
            min_seats: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_radius_meters(mut self, radius_meters: f64) -> Self {
        self.radius_meters = Some(radius_meters);
        self
    }

    pub fn with_min_seats(mut self, min_seats: u32) -> Self {
        self.min_seats = Some(min_seats);
        self
    }
}

/// One ranked driver in a [`MatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub driver_id: String,
    pub distance_meters: f64,
    pub eta_seconds: f64,
    pub raw_score: f64,
    pub probability: f64,
}

/// Why a result carries no candidates, or [`ReasonCode::Matched`] when it does.
///
/// Serializes as `""`, `"NO_DRIVERS"` or `"INVALID_REQUEST"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Matched,
    NoDrivers,
    InvalidRequest,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "",
            Self::NoDrivers => "NO_DRIVERS",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" => Ok(Self::Matched),
            "NO_DRIVERS" => Ok(Self::NoDrivers),
            "INVALID_REQUEST" => Ok(Self::InvalidRequest),
            other => Err(format!("unknown reason code '{other}'")),
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReasonCode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ranked, probability-weighted candidates for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub request_id: String,
    pub candidates: Vec<Candidate>,
    pub reason_code: ReasonCode,
}

impl MatchResult {
    pub fn matched(request_id: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self {
            request_id: request_id.into(),
            candidates,
            reason_code: ReasonCode::Matched,
        }
    }

    pub fn no_drivers(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            candidates: Vec::new(),
            reason_code: ReasonCode::NoDrivers,
        }
    }

    pub fn invalid(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            candidates: Vec::new(),
            reason_code: ReasonCode::InvalidRequest,
        }
    }

    pub fn is_success(&self) -> bool {
        self.reason_code == ReasonCode::Matched
    }

    pub fn probability_sum(&self) -> f64 {
        self.candidates.iter().map(|c| c.probability).sum()
    }
}
