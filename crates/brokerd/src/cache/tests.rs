//! Unit tests for the connection cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;

struct Harness {
    registry: Arc<HandleRegistry>,
    cache: ConnectionCache,
    connects: AtomicUsize,
}

impl Harness {
    fn with_ttl(ttl: Duration) -> Self {
        let registry = Arc::new(HandleRegistry::new());
        Self {
            cache: ConnectionCache::new(Arc::clone(&registry), ttl),
            registry,
            connects: AtomicUsize::new(0),
        }
    }

    fn connect(&self, fingerprint: &Fingerprint) -> CacheLookup {
        self.cache
            .get_or_create(fingerprint, || {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(self.registry.create(HandleKind::Connection, ()))
            })
            .expect("factory succeeds")
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::with_ttl(Duration::from_secs(3600))
}

fn spec(password: &str, autocommit: bool) -> ConnectionSpec {
    serde_json::from_value(json!({
        "dsn": "dbi:Pg:dbname=app",
        "username": "app",
        "password": password,
        "options": {"AutoCommit": autocommit}
    }))
    .expect("valid spec")
}

#[rstest]
fn identical_fingerprints_share_a_handle(harness: Harness) {
    let first = harness.connect(&spec("secret", true).fingerprint(false));
    let second = harness.connect(&spec("other-secret", true).fingerprint(false));

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.handle_id, second.handle_id);
    assert_eq!(harness.connects.load(Ordering::SeqCst), 1);
    assert_eq!(harness.cache.stats().hits, 1);
}

#[rstest]
fn changed_option_yields_a_new_handle(harness: Harness) {
    let first = harness.connect(&spec("secret", true).fingerprint(false));
    let second = harness.connect(&spec("secret", false).fingerprint(false));

    assert_ne!(first.handle_id, second.handle_id);
    assert!(!second.cached);
}

#[rstest]
fn missing_handle_forces_reconnect(harness: Harness) {
    let fingerprint = spec("secret", true).fingerprint(false);
    let first = harness.connect(&fingerprint);
    harness.registry.destroy(&first.handle_id);

    let second = harness.connect(&fingerprint);

    assert!(!second.cached);
    assert_ne!(first.handle_id, second.handle_id);
}

#[test]
fn expired_entries_are_replaced_and_closed() {
    let harness = Harness::with_ttl(Duration::from_millis(10));
    let fingerprint = spec("secret", true).fingerprint(false);
    let first = harness.connect(&fingerprint);
    thread::sleep(Duration::from_millis(30));

    let second = harness.connect(&fingerprint);

    assert!(!second.cached);
    assert!(!harness.registry.contains(&first.handle_id, HandleKind::Connection));
}

#[rstest]
fn invalidate_destroys_the_handle(harness: Harness) {
    let fingerprint = spec("secret", true).fingerprint(false);
    let lookup = harness.connect(&fingerprint);

    assert!(harness.cache.invalidate_handle(&lookup.handle_id));
    assert!(!harness.registry.contains(&lookup.handle_id, HandleKind::Connection));
    assert!(!harness.cache.invalidate(&fingerprint));

    let again = harness.connect(&fingerprint);
    assert!(!again.cached);
}

#[rstest]
fn factory_errors_are_not_cached(harness: Harness) {
    let fingerprint = spec("secret", true).fingerprint(false);
    let error = harness
        .cache
        .get_or_create(&fingerprint, || Err::<HandleId, _>("refused"))
        .expect_err("factory fails");
    assert_eq!(error, "refused");

    let lookup = harness.connect(&fingerprint);
    assert!(!lookup.cached);
}

#[test]
fn purge_removes_expired_entries() {
    let harness = Harness::with_ttl(Duration::from_millis(10));
    harness.connect(&spec("a", true).fingerprint(false));
    harness.connect(&spec("a", false).fingerprint(false));
    thread::sleep(Duration::from_millis(30));

    assert_eq!(harness.cache.purge_expired(), 2);
    assert_eq!(harness.cache.stats().entries, 0);
    assert!(harness.registry.is_empty());
}

#[rstest]
fn concurrent_callers_run_factory_once(harness: Harness) {
    let harness = Arc::new(harness);
    let fingerprint = spec("secret", true).fingerprint(false);
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let fingerprint = fingerprint.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                harness.connect(&fingerprint).handle_id
            })
        })
        .collect();
    let ids: Vec<HandleId> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker"))
        .collect();

    assert_eq!(harness.connects.load(Ordering::SeqCst), 1);
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
}

#[rstest]
fn handles_poisoned_by_a_panicking_user_are_not_served_again(harness: Harness) {
    let harness = Arc::new(harness);
    let fingerprint = spec("secret", true).fingerprint(false);
    let first = harness.connect(&fingerprint);

    let user = {
        let harness = Arc::clone(&harness);
        let id = first.handle_id.clone();
        thread::spawn(move || {
            harness
                .registry
                .with_handle::<(), _, _>(&id, HandleKind::Connection, |_| {
                    panic!("driver blew up mid-call")
                })
                .ok();
        })
    };
    assert!(user.join().is_err());

    let second = harness.connect(&fingerprint);
    assert!(!second.cached);
    assert_ne!(second.handle_id, first.handle_id);
    assert_eq!(harness.connects.load(Ordering::SeqCst), 2);
}

#[rstest]
fn invalidation_during_a_slow_connect_never_doubles_the_factory(harness: Harness) {
    let harness = Arc::new(harness);
    let fingerprint = spec("secret", true).fingerprint(false);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let connect = |delay: Duration| {
        let harness = Arc::clone(&harness);
        let fingerprint = fingerprint.clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        thread::spawn(move || {
            thread::sleep(delay);
            harness
                .cache
                .get_or_create(&fingerprint, || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(80));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(harness.registry.create(HandleKind::Connection, ()))
                })
                .expect("factory succeeds")
        })
    };

    let slow = connect(Duration::ZERO);
    thread::sleep(Duration::from_millis(20));
    let invalidator = {
        let harness = Arc::clone(&harness);
        let fingerprint = fingerprint.clone();
        thread::spawn(move || harness.cache.invalidate(&fingerprint))
    };
    let late = connect(Duration::from_millis(20));

    slow.join().expect("slow connect");
    invalidator.join().expect("invalidate");
    late.join().expect("late connect");

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(harness.cache.stats().entries <= 1);
}
