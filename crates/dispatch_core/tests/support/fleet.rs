use std::sync::Arc;

use dispatch_core::test_helpers::{driver, store_with};
use dispatch_core::{DriverStore, Location, TripRequest};

/// A, B and C from the reference scenario: A at the origin, B about 1.1 km east,
/// C at the origin but off duty.
pub fn abc_store() -> Arc<DriverStore> {
    store_with([
        driver("A", 0.0, 0.0),
        driver("B", 0.0, 0.01),
        driver("C", 0.0, 0.0).with_available(false),
    ])
}

/// Two-candidate request at the origin with a 5 km radius.
pub fn abc_request(request_id: &str) -> TripRequest {
    TripRequest::new(request_id, Location::new(0.0, 0.0), 2).with_radius_meters(5_000.0)
}
