//! Location-feed records, one JSON object per line.

use dispatch_core::{DriverRecord, DriverStore, UpsertOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FeedOp {
    Upsert {
        record: DriverRecord,
    },
    Remove {
        driver_id: String,
    },
    Availability {
        driver_id: String,
        available: bool,
        #[serde(default)]
        expected_version: Option<u64>,
    },
}

/// What happened to each line of a feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub applied: usize,
    pub stale: usize,
    pub rejected: usize,
}

/// Parse a JSON-lines feed. Blank lines are skipped; each malformed line is
/// returned as `Err` with its 1-based line number.
pub fn parse_feed(raw: &str) -> Vec<Result<FeedOp, (usize, serde_json::Error)>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| serde_json::from_str(line).map_err(|err| (idx + 1, err)))
        .collect()
}

/// Apply a feed to `store` in order. Bad lines and rejected updates are logged and
/// skipped.
pub fn apply_feed(store: &DriverStore, raw: &str) -> FeedReport {
    let mut report = FeedReport::default();
    for entry in parse_feed(raw) {
        let op = match entry {
            Ok(op) => op,
            Err((line, err)) => {
                warn!(line, error = %err, "skipping malformed feed line");
                report.rejected += 1;
                continue;
            }
        };
        match apply_op(store, op) {
            Ok(true) => report.applied += 1,
            Ok(false) => report.stale += 1,
            Err(message) => {
                warn!(%message, "feed update rejected");
                report.rejected += 1;
            }
        }
    }
    debug!(?report, drivers = store.len(), "feed applied");
    report
}

/// `Ok(false)` means the store already held newer state.
fn apply_op(store: &DriverStore, op: FeedOp) -> Result<bool, String> {
    match op {
        FeedOp::Upsert { record } => match store.upsert(record) {
            Ok(UpsertOutcome::Stale) => Ok(false),
            Ok(_) => Ok(true),
            Err(err) => Err(err.to_string()),
        },
        FeedOp::Remove { driver_id } => {
            if !store.remove(&driver_id) {
                debug!(driver_id = %driver_id, "remove for unknown driver");
            }
            Ok(true)
        }
        FeedOp::Availability {
            driver_id,
            available,
            expected_version,
        } => store
            .set_availability(&driver_id, available, expected_version)
            .map(|_| true)
            .map_err(|err| err.to_string()),
    }
}
