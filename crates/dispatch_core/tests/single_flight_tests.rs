mod support;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use dispatch_core::test_helpers::{engine_with, CountingEta};
use dispatch_core::{CallContext, CancelToken, MatchError, MatchingEngine};
use support::fleet::{abc_request, abc_store};

fn slow_engine(delay: Duration) -> (MatchingEngine, Arc<CountingEta>) {
    let eta = Arc::new(CountingEta::with_delay(delay));
    let engine = engine_with(abc_store()).with_eta_estimator(eta.clone());
    (engine, eta)
}

fn wait_for_leader(engine: &MatchingEngine) {
    let started = Instant::now();
    while engine.cache().in_flight() == 0 {
        assert!(started.elapsed() < Duration::from_secs(5), "leader never started");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn concurrent_duplicates_compute_once() {
    let (engine, eta) = slow_engine(Duration::from_millis(20));
    let request = abc_request("trip-burst");
    let callers = 100;
    let barrier = Barrier::new(callers);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine.match_request(&request).expect("match")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("caller thread"))
            .collect()
    });

    // Two drivers pass the prefilter, so one computation means two ETA calls.
    assert_eq!(eta.calls(), 2);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));

    let stats = engine.stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.requests, callers as u64);
    assert_eq!(stats.cache_hits + stats.coalesced, callers as u64 - 1);
}

#[test]
fn distinct_requests_do_not_block_each_other() {
    let (engine, eta) = slow_engine(Duration::from_millis(5));

    thread::scope(|scope| {
        for i in 0..8 {
            let engine = &engine;
            scope.spawn(move || {
                let result = engine
                    .match_request(&abc_request(&format!("trip-{i}")))
                    .expect("match");
                assert_eq!(result.candidates.len(), 2);
            });
        }
    });

    assert_eq!(eta.calls(), 16);
    assert_eq!(engine.stats().computations, 8);
}

#[test]
fn cancelled_waiter_returns_while_leader_finishes() {
    let (engine, _eta) = slow_engine(Duration::from_millis(150));
    let request = abc_request("trip-cancel");
    let token = CancelToken::new();

    thread::scope(|scope| {
        let leader = scope.spawn(|| engine.match_request(&request));
        wait_for_leader(&engine);

        let waiter = {
            let ctx = CallContext::background().with_cancel_token(token.clone());
            let engine = &engine;
            let request = &request;
            scope.spawn(move || engine.match_request_with(request, &ctx))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let waited = waiter.join().expect("waiter thread");
        assert!(matches!(waited, Err(MatchError::Cancelled(_))));

        let led = leader.join().expect("leader thread").expect("leader result");
        assert_eq!(led.candidates.len(), 2);
    });

    // The abandoned wait did not discard the computation.
    let cached = engine.cache().get("trip-cancel").expect("cache").expect("entry");
    assert_eq!(cached.candidates.len(), 2);
    assert_eq!(engine.stats().computations, 1);
}

#[test]
fn waiter_gives_up_at_its_deadline() {
    let (engine, _eta) = slow_engine(Duration::from_millis(150));
    let request = abc_request("trip-deadline");

    thread::scope(|scope| {
        let leader = scope.spawn(|| engine.match_request(&request));
        wait_for_leader(&engine);

        let started = Instant::now();
        let waited = engine.match_request_with(&request, &CallContext::with_timeout(Duration::from_millis(10)));
        assert!(matches!(waited, Err(MatchError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_millis(250));

        leader.join().expect("leader thread").expect("leader result");
    });

    assert!(engine.match_request(&request).is_ok());
    assert_eq!(engine.stats().computations, 1);
}

#[test]
fn configured_wait_timeout_bounds_background_calls() {
    let eta = Arc::new(CountingEta::with_delay(Duration::from_millis(150)));
    let config = dispatch_core::MatchingConfig::default().with_wait_timeout_ms(10);
    let engine = MatchingEngine::new(config, abc_store())
        .expect("engine")
        .with_eta_estimator(eta);
    let request = abc_request("trip-bounded");

    thread::scope(|scope| {
        let leader = scope.spawn(|| engine.match_request(&request));
        wait_for_leader(&engine);

        let waited = engine.match_request(&request);
        assert!(matches!(waited, Err(MatchError::TimedOut(_))));

        // The leader's own computation is never bounded by the wait timeout.
        leader.join().expect("leader thread").expect("leader result");
    });
}
