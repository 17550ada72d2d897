//! Idempotency cache with single-flight computation.
//!
//! Completed results live in an LRU bounded by capacity and a TTL. Computations in
//! progress live in a separate in-flight map, so eviction can never drop a slot that
//! other callers are waiting on. Moving a result from in-flight to completed happens
//! under one lock, so every caller sees exactly one of the two.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::cancel::{CallContext, Wake};
use crate::clock::{Clock, MonotonicClock};
use crate::error::MatchError;
use crate::types::MatchResult;

/// How a result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Served from a completed entry.
    Cached,
    /// Computed by this caller.
    Computed,
    /// Computed by a concurrent caller this one waited for.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub result: Arc<MatchResult>,
    pub source: ResultSource,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Arc<MatchResult>,
    fingerprint: Option<String>,
    stored_at_ms: u64,
}

#[derive(Debug)]
enum FlightState {
    Pending,
    Done(Arc<MatchResult>),
    Abandoned,
}

/// One in-progress computation that late arrivals can wait on.
#[derive(Debug)]
struct Flight {
    state: Mutex<FlightState>,
    ready: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, next: FlightState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next;
        self.ready.notify_all();
    }

    fn wait(self: &Arc<Self>, request_id: &str, ctx: &CallContext) -> Result<Arc<MatchResult>, MatchError> {
        let listener: Arc<dyn Wake> = self.clone();
        ctx.cancel_token().subscribe(Arc::downgrade(&listener));

        let mut state = self
            .state
            .lock()
            .map_err(|_| poisoned("in-flight slot", request_id))?;
        loop {
            match &*state {
                FlightState::Done(result) => return Ok(Arc::clone(result)),
                FlightState::Abandoned => {
                    return Err(MatchError::Internal(format!(
                        "computation for request {request_id} was abandoned"
                    )))
                }
                FlightState::Pending => {}
            }
            if ctx.is_cancelled() {
                return Err(MatchError::Cancelled(request_id.to_string()));
            }
            state = match ctx.deadline() {
                None => self
                    .ready
                    .wait(state)
                    .map_err(|_| poisoned("in-flight slot", request_id))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MatchError::TimedOut(request_id.to_string()));
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| poisoned("in-flight slot", request_id))?
                        .0
                }
            };
        }
    }
}

impl Wake for Flight {
    fn wake(&self) {
        // Taking the lock orders this notification after any waiter's flag check.
        let _state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.ready.notify_all();
    }
}

#[derive(Debug)]
struct CacheState {
    completed: LruCache<String, CacheEntry>,
    in_flight: HashMap<String, Arc<Flight>>,
    evictions: u64,
}

enum Role {
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
}

pub struct IdempotencyCache {
    state: Mutex<CacheState>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCache")
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

impl IdempotencyCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(capacity: NonZeroUsize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                completed: LruCache::new(capacity),
                in_flight: HashMap::new(),
                evictions: 0,
            }),
            ttl_ms: ttl.as_millis() as u64,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, MatchError> {
        self.state
            .lock()
            .map_err(|_| MatchError::Internal("idempotency cache lock poisoned".to_string()))
    }

    fn is_fresh(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.stored_at_ms) < self.ttl_ms
    }

    /// Look up a completed, unexpired result. Expired entries are dropped.
    pub fn get(&self, request_id: &str) -> Result<Option<Arc<MatchResult>>, MatchError> {
        let mut state = self.lock()?;
        let now_ms = self.clock.now_ms();
        Ok(self
            .fresh_entry(&mut state, request_id, now_ms)
            .map(|entry| entry.result))
    }

    /// Store a result computed elsewhere. Does not disturb an in-flight computation
    /// for the same id; that one will overwrite this entry when it finishes.
    pub fn put(&self, request_id: &str, result: MatchResult) -> Result<(), MatchError> {
        let mut state = self.lock()?;
        let entry = CacheEntry {
            result: Arc::new(result),
            fingerprint: None,
            stored_at_ms: self.clock.now_ms(),
        };
        Self::insert(&mut state, request_id, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.completed.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().map(|state| state.in_flight.len()).unwrap_or(0)
    }

    /// Entries pushed out by the capacity bound so far.
    pub fn evictions(&self) -> u64 {
        self.lock().map(|state| state.evictions).unwrap_or(0)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, MatchError> {
        let mut state = self.lock()?;
        let now_ms = self.clock.now_ms();
        let expired: Vec<String> = state
            .completed
            .iter()
            .filter(|(_, entry)| !self.is_fresh(entry, now_ms))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.completed.pop(id);
        }
        Ok(expired.len())
    }

    fn fresh_entry(&self, state: &mut CacheState, request_id: &str, now_ms: u64) -> Option<CacheEntry> {
        let fresh = self.is_fresh(state.completed.peek(request_id)?, now_ms);
        if fresh {
            state.completed.get(request_id).cloned()
        } else {
            state.completed.pop(request_id);
            None
        }
    }

    fn insert(state: &mut CacheState, request_id: &str, entry: CacheEntry) {
        if let Some((evicted, _)) = state.completed.push(request_id.to_string(), entry) {
            if evicted != request_id {
                state.evictions += 1;
            }
        }
    }

    /// Return the cached result for `request_id`, or compute it exactly once.
    ///
    /// Concurrent callers with the same id wait for the first one's computation,
    /// bounded by their own context. Giving up never stops the computation.
    pub fn get_or_compute<F>(
        &self,
        request_id: &str,
        fingerprint: Option<String>,
        ctx: &CallContext,
        compute: F,
    ) -> Result<CacheOutcome, MatchError>
    where
        F: FnOnce() -> MatchResult,
    {
        if ctx.is_cancelled() {
            return Err(MatchError::Cancelled(request_id.to_string()));
        }

        let role = {
            let mut state = self.lock()?;
            let now_ms = self.clock.now_ms();
            if let Some(entry) = self.fresh_entry(&mut state, request_id, now_ms) {
                if let (Some(stored), Some(incoming)) = (&entry.fingerprint, &fingerprint) {
                    if stored != incoming {
                        warn!(
                            request_id,
                            "replayed request id carries a different payload; serving the original result"
                        );
                    }
                }
                return Ok(CacheOutcome {
                    result: entry.result,
                    source: ResultSource::Cached,
                });
            }
            match state.in_flight.get(request_id) {
                Some(flight) => Role::Follower(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::new());
                    state
                        .in_flight
                        .insert(request_id.to_string(), Arc::clone(&flight));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Follower(flight) => {
                debug!(request_id, "waiting on in-flight computation");
                let result = flight.wait(request_id, ctx)?;
                Ok(CacheOutcome {
                    result,
                    source: ResultSource::Coalesced,
                })
            }
            Role::Leader(flight) => {
                let mut guard = FlightGuard {
                    cache: self,
                    request_id,
                    flight,
                    finished: false,
                };
                let result = Arc::new(compute());
                guard.complete(Arc::clone(&result), fingerprint)?;
                Ok(CacheOutcome {
                    result,
                    source: ResultSource::Computed,
                })
            }
        }
    }
}

/// Releases an in-flight slot even when the computation panics.
struct FlightGuard<'a> {
    cache: &'a IdempotencyCache,
    request_id: &'a str,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn complete(&mut self, result: Arc<MatchResult>, fingerprint: Option<String>) -> Result<(), MatchError> {
        self.finished = true;
        let stored = match self.cache.lock() {
            Ok(mut state) => {
                state.in_flight.remove(self.request_id);
                let entry = CacheEntry {
                    result: Arc::clone(&result),
                    fingerprint,
                    stored_at_ms: self.cache.clock.now_ms(),
                };
                IdempotencyCache::insert(&mut state, self.request_id, entry);
                Ok(())
            }
            Err(err) => Err(err),
        };
        // Waiters get the result either way; only storing it for later replays failed.
        self.flight.finish(FlightState::Done(result));
        stored
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(request_id = self.request_id, "match computation panicked; releasing waiters");
        let mut state = self
            .cache
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(self.request_id);
        drop(state);
        self.flight.finish(FlightState::Abandoned);
    }
}

fn poisoned(what: &str, request_id: &str) -> MatchError {
    MatchError::Internal(format!("{what} lock poisoned for request {request_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn cache_with(clock: Arc<ManualClock>, capacity: usize, ttl_secs: u64) -> IdempotencyCache {
        IdempotencyCache::with_clock(
            NonZeroUsize::new(capacity).expect("non-zero"),
            Duration::from_secs(ttl_secs),
            clock,
        )
    }

    #[test]
    fn get_put_round_trip() {
        let cache = cache_with(Arc::new(ManualClock::new(0)), 4, 60);
        assert!(cache.get("r").unwrap().is_none());
        cache.put("r", MatchResult::no_drivers("r")).unwrap();
        assert_eq!(*cache.get("r").unwrap().expect("hit"), MatchResult::no_drivers("r"));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(clock.clone(), 4, 10);
        cache.put("r", MatchResult::no_drivers("r")).unwrap();

        clock.advance_secs(9);
        assert!(cache.get("r").unwrap().is_some());
        clock.advance_secs(1);
        assert!(cache.get("r").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache_with(clock.clone(), 4, 10);
        cache.put("old", MatchResult::no_drivers("old")).unwrap();
        clock.advance_secs(6);
        cache.put("new", MatchResult::no_drivers("new")).unwrap();
        clock.advance_secs(5);

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").unwrap().is_some());
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = cache_with(Arc::new(ManualClock::new(0)), 2, 60);
        cache.put("a", MatchResult::no_drivers("a")).unwrap();
        cache.put("b", MatchResult::no_drivers("b")).unwrap();
        cache.get("a").unwrap();
        cache.put("c", MatchResult::no_drivers("c")).unwrap();

        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("c").unwrap().is_some());
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn computes_once_then_serves_cached() {
        let cache = cache_with(Arc::new(ManualClock::new(0)), 4, 60);
        let calls = AtomicUsize::new(0);
        let ctx = CallContext::background();
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            MatchResult::no_drivers("r")
        };

        let first = cache.get_or_compute("r", None, &ctx, compute).unwrap();
        let second = cache
            .get_or_compute("r", None, &ctx, || MatchResult::invalid("r"))
            .unwrap();

        assert_eq!(first.source, ResultSource::Computed);
        assert_eq!(second.source, ResultSource::Cached);
        assert_eq!(first.result, second.result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(cache_with(Arc::new(ManualClock::new(0)), 4, 60));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute("r", None, &CallContext::background(), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            MatchResult::no_drivers("r")
                        })
                        .expect("result")
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| *o.result == MatchResult::no_drivers("r")));
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| o.source == ResultSource::Computed)
                .count(),
            1
        );
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn cancelled_waiter_returns_while_leader_finishes() {
        let cache = Arc::new(cache_with(Arc::new(ManualClock::new(0)), 4, 60));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let leader = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                cache.get_or_compute("r", None, &CallContext::background(), || {
                    started.wait();
                    release.wait();
                    MatchResult::no_drivers("r")
                })
            })
        };

        started.wait();
        let token = CancelToken::new();
        let waiter = {
            let cache = Arc::clone(&cache);
            let ctx = CallContext::background().with_cancel_token(token.clone());
            thread::spawn(move || cache.get_or_compute("r", None, &ctx, || MatchResult::invalid("r")))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let waited = waiter.join().expect("join waiter");
        assert_eq!(waited.unwrap_err(), MatchError::Cancelled("r".to_string()));

        release.wait();
        let led = leader.join().expect("join leader").expect("leader result");
        assert_eq!(led.source, ResultSource::Computed);
        assert!(cache.get("r").unwrap().is_some());
    }

    #[test]
    fn waiter_times_out() {
        let cache = Arc::new(cache_with(Arc::new(ManualClock::new(0)), 4, 60));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let leader = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                cache.get_or_compute("r", None, &CallContext::background(), || {
                    started.wait();
                    release.wait();
                    MatchResult::no_drivers("r")
                })
            })
        };

        started.wait();
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let err = cache
            .get_or_compute("r", None, &ctx, || MatchResult::invalid("r"))
            .unwrap_err();
        assert_eq!(err, MatchError::TimedOut("r".to_string()));

        release.wait();
        leader.join().expect("join").expect("leader result");
    }

    #[test]
    fn panicking_leader_releases_waiters_and_slot() {
        let cache = Arc::new(cache_with(Arc::new(ManualClock::new(0)), 4, 60));
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                let _ = cache.get_or_compute("r", None, &CallContext::background(), || {
                    started.wait();
                    thread::sleep(Duration::from_millis(30));
                    panic!("scoring blew up");
                });
            })
        };

        started.wait();
        let err = cache
            .get_or_compute("r", None, &CallContext::background(), || MatchResult::invalid("r"))
            .unwrap_err();
        assert!(matches!(err, MatchError::Internal(_)));
        assert!(leader.join().is_err());

        // The slot is free again, so a later call recomputes.
        let retry = cache
            .get_or_compute("r", None, &CallContext::background(), || MatchResult::no_drivers("r"))
            .unwrap();
        assert_eq!(retry.source, ResultSource::Computed);
    }

    #[test]
    fn already_cancelled_context_does_nothing() {
        let cache = cache_with(Arc::new(ManualClock::new(0)), 4, 60);
        let ctx = CallContext::background();
        ctx.cancel_token().cancel();
        let err = cache
            .get_or_compute("r", None, &ctx, || MatchResult::no_drivers("r"))
            .unwrap_err();
        assert_eq!(err, MatchError::Cancelled("r".to_string()));
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }
}
