//! Driver state store: the in-memory registry fed by the location feed.
//!
//! Writes are serialized behind a write lock and applied copy-on-write to an
//! `Arc<FleetState>`, so a snapshot only ever holds the read lock long enough to
//! clone an `Arc`. Filtering and copying records happen outside the lock and see a
//! state no writer can touch.
//!
//! Besides the records, the state keeps an H3 cell → driver ids map so searches
//! around a point can skip drivers that are obviously too far away.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use h3o::{CellIndex, Resolution};
use tracing::debug;

use crate::error::{StoreError, ValidationError};
use crate::spatial::GeoIndex;
use crate::types::{DriverRecord, Location};

/// What an accepted [`DriverStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The update was older than the stored record and was ignored.
    Stale,
}

/// Immutable, read-consistent copy of the records matching a filter,
/// ordered by `driver_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    records: Vec<DriverRecord>,
}

impl FleetSnapshot {
    pub fn records(&self) -> &[DriverRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<DriverRecord> {
        self.records
    }
}

impl FromIterator<DriverRecord> for FleetSnapshot {
    fn from_iter<I: IntoIterator<Item = DriverRecord>>(iter: I) -> Self {
        let mut records: Vec<DriverRecord> = iter.into_iter().collect();
        records.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        Self { records }
    }
}

#[derive(Debug, Clone)]
struct StoredDriver {
    record: DriverRecord,
    cell: Option<CellIndex>,
}

#[derive(Debug, Clone, Default)]
struct FleetState {
    drivers: BTreeMap<String, StoredDriver>,
    drivers_by_cell: HashMap<CellIndex, BTreeSet<String>>,
}

impl FleetState {
    fn index(&mut self, driver_id: &str, cell: Option<CellIndex>) {
        if let Some(cell) = cell {
            self.drivers_by_cell
                .entry(cell)
                .or_default()
                .insert(driver_id.to_string());
        }
    }

    fn unindex(&mut self, driver_id: &str, cell: Option<CellIndex>) {
        let Some(cell) = cell else { return };
        if let Some(ids) = self.drivers_by_cell.get_mut(&cell) {
            ids.remove(driver_id);
            if ids.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }
}

/// Shared registry of known drivers. Pass it around by `Arc`.
#[derive(Debug)]
pub struct DriverStore {
    state: RwLock<Arc<FleetState>>,
    geo: GeoIndex,
}

impl Default for DriverStore {
    fn default() -> Self {
        Self::new(GeoIndex::default().resolution())
    }
}

impl DriverStore {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            state: RwLock::new(Arc::new(FleetState::default())),
            geo: GeoIndex::new(resolution),
        }
    }

    pub fn geo(&self) -> GeoIndex {
        self.geo
    }

    // A panic while holding the lock can only happen before `Arc::make_mut`
    // returns or after the state is fully updated, so the inner value stays usable.
    fn read(&self) -> RwLockReadGuard<'_, Arc<FleetState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<FleetState>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Arc<FleetState> {
        Arc::clone(&self.read())
    }

    /// Insert a driver or replace its mutable fields.
    ///
    /// Invalid records are rejected without touching the store. An update whose
    /// `last_updated` is older than the stored record's is ignored.
    pub fn upsert(&self, record: DriverRecord) -> Result<UpsertOutcome, ValidationError> {
        validate_record(&record)?;
        let cell = self.geo.cell_of(record.location);

        let mut guard = self.write();
        if let Some(existing) = guard.drivers.get(&record.driver_id) {
            if record.last_updated < existing.record.last_updated {
                debug!(
                    driver_id = %record.driver_id,
                    stored = existing.record.last_updated,
                    incoming = record.last_updated,
                    "ignoring stale driver update"
                );
                return Ok(UpsertOutcome::Stale);
            }
        }

        let state = Arc::make_mut(&mut guard);
        let outcome = match state.drivers.get_mut(&record.driver_id) {
            Some(existing) => {
                let old_cell = existing.cell;
                let version = existing.record.version + 1;
                existing.record = DriverRecord { version, ..record };
                existing.cell = cell;
                if old_cell != cell {
                    let driver_id = existing.record.driver_id.clone();
                    state.unindex(&driver_id, old_cell);
                    state.index(&driver_id, cell);
                }
                UpsertOutcome::Updated
            }
            None => {
                let driver_id = record.driver_id.clone();
                state.index(&driver_id, cell);
                state.drivers.insert(
                    driver_id,
                    StoredDriver {
                        record: DriverRecord {
                            version: 1,
                            ..record
                        },
                        cell,
                    },
                );
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    /// Deregister a driver. Returns whether a record was removed.
    pub fn remove(&self, driver_id: &str) -> bool {
        let mut guard = self.write();
        if !guard.drivers.contains_key(driver_id) {
            return false;
        }
        let state = Arc::make_mut(&mut guard);
        match state.drivers.remove(driver_id) {
            Some(stored) => {
                state.unindex(driver_id, stored.cell);
                true
            }
            None => false,
        }
    }

    /// Flip a driver's availability, optionally guarded by the version the caller last saw.
    ///
    /// Returns the new version.
    pub fn set_availability(
        &self,
        driver_id: &str,
        available: bool,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.write();
        let actual = guard
            .drivers
            .get(driver_id)
            .map(|stored| stored.record.version)
            .ok_or_else(|| StoreError::UnknownDriver(driver_id.to_string()))?;
        if let Some(expected) = expected_version {
            if expected != actual {
                return Err(StoreError::VersionConflict {
                    driver_id: driver_id.to_string(),
                    expected,
                    actual,
                });
            }
        }
        let state = Arc::make_mut(&mut guard);
        let stored = state
            .drivers
            .get_mut(driver_id)
            .ok_or_else(|| StoreError::UnknownDriver(driver_id.to_string()))?;
        stored.record.available = available;
        stored.record.version = actual + 1;
        Ok(stored.record.version)
    }

    pub fn get(&self, driver_id: &str) -> Option<DriverRecord> {
        self.read()
            .drivers
            .get(driver_id)
            .map(|stored| stored.record.clone())
    }

    pub fn len(&self) -> usize {
        self.read().drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().drivers.is_empty()
    }

    /// Copy every record matching `filter`.
    pub fn snapshot<F>(&self, filter: F) -> FleetSnapshot
    where
        F: Fn(&DriverRecord) -> bool,
    {
        let state = self.current();
        let records = state
            .drivers
            .values()
            .map(|stored| &stored.record)
            .filter(|record| filter(record))
            .cloned()
            .collect();
        FleetSnapshot { records }
    }

    /// Like [`snapshot`](Self::snapshot), restricted to drivers whose cell lies in
    /// the disk covering `radius_meters` around `origin`.
    ///
    /// The result may still contain drivers beyond the radius; exact distance
    /// filtering is the prefilter's job. Falls back to a full scan when the radius
    /// is too large to enumerate cells.
    pub fn snapshot_near<F>(&self, origin: Location, radius_meters: f64, filter: F) -> FleetSnapshot
    where
        F: Fn(&DriverRecord) -> bool,
    {
        let Some(disk) = self.geo.covering_disk(origin, radius_meters) else {
            debug!(radius_meters, "search radius too wide for cell lookup, scanning fleet");
            return self.snapshot(filter);
        };

        let state = self.current();
        let ids: BTreeSet<&String> = disk
            .iter()
            .filter_map(|cell| state.drivers_by_cell.get(cell))
            .flatten()
            .collect();
        let records = ids
            .into_iter()
            .filter_map(|id| state.drivers.get(id))
            .map(|stored| &stored.record)
            .filter(|record| filter(record))
            .cloned()
            .collect();
        FleetSnapshot { records }
    }
}

fn validate_record(record: &DriverRecord) -> Result<(), ValidationError> {
    if record.driver_id.trim().is_empty() {
        return Err(ValidationError::EmptyDriverId);
    }
    if !record.location.is_valid() {
        return Err(ValidationError::InvalidLocation {
            driver_id: record.driver_id.clone(),
            lat: record.location.lat,
            lon: record.location.lon,
        });
    }
    if record.capacity < 0 {
        return Err(ValidationError::NegativeCapacity {
            driver_id: record.driver_id.clone(),
            capacity: record.capacity,
        });
    }
    Ok(())
}
