//! Offline replay of a fleet feed and a batch of trip requests.
//!
//! The feed is applied in file order to a fresh [`DriverStore`]; requests are then
//! matched in parallel on a rayon pool and returned in input order.

pub mod feed;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dispatch_core::{
    ConfigError, DriverStore, MatchError, MatchResult, MatchingConfig, MatchingEngine, TripRequest,
};
use rayon::prelude::*;
use thiserror::Error;

pub use feed::{apply_feed, parse_feed, FeedOp, FeedReport};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("requests file {path} is not a JSON array of trip requests")]
    Requests {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("request {request_id} failed")]
    Match {
        request_id: String,
        #[source]
        source: MatchError,
    },
}

fn read(path: &Path) -> Result<String, ReplayError> {
    fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate a config file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<MatchingConfig, ReplayError> {
    let config = match path {
        Some(path) => MatchingConfig::from_path(path)?,
        None => MatchingConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Build a store at the configured resolution and apply the feed file to it.
pub fn load_fleet(path: &Path, config: &MatchingConfig) -> Result<(Arc<DriverStore>, FeedReport), ReplayError> {
    let store = Arc::new(DriverStore::new(config.resolution()?));
    let report = apply_feed(&store, &read(path)?);
    Ok((store, report))
}

pub fn load_requests(path: &Path) -> Result<Vec<TripRequest>, ReplayError> {
    serde_json::from_str(&read(path)?).map_err(|source| ReplayError::Requests {
        path: path.to_path_buf(),
        source,
    })
}

/// Match every request, preserving input order.
///
/// `threads` of `None` uses rayon's default pool size.
pub fn replay(
    engine: &MatchingEngine,
    requests: &[TripRequest],
    threads: Option<usize>,
) -> Result<Vec<MatchResult>, ReplayError> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = threads {
        builder = builder.num_threads(threads);
    }
    let pool = builder.build()?;

    pool.install(|| {
        requests
            .par_iter()
            .map(|request| {
                engine
                    .match_request(request)
                    .map_err(|source| ReplayError::Match {
                        request_id: request.request_id.clone(),
                        source,
                    })
            })
            .collect()
    })
}
