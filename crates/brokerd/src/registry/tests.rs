//! Unit tests for the handle registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn registry() -> HandleRegistry {
    HandleRegistry::new()
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[rstest]
fn with_handle_mutates_payload(registry: HandleRegistry) {
    let id = registry.create(HandleKind::Session, 1_u32);
    registry
        .with_handle::<u32, _, _>(&id, HandleKind::Session, |value| *value += 41)
        .expect("handle exists");
    let value = registry
        .with_handle::<u32, _, _>(&id, HandleKind::Session, |value| *value)
        .expect("handle exists");
    assert_eq!(value, 42);
}

#[rstest]
#[case::wrong_kind(HandleKind::Cipher)]
#[case::right_kind_wrong_type(HandleKind::Session)]
fn mismatches_report_not_found(registry: HandleRegistry, #[case] kind: HandleKind) {
    let id = registry.create(HandleKind::Session, String::from("payload"));
    let error = registry
        .with_handle::<u64, _, _>(&id, kind, |_| ())
        .expect_err("lookup must fail");
    assert!(matches!(error, RegistryError::NotFound { .. }));
    assert!(registry.contains(&id, HandleKind::Session), "handle survives mismatch");
}

#[rstest]
fn destroy_is_idempotent(registry: HandleRegistry) {
    let dropped = Arc::new(AtomicBool::new(false));
    let id = registry.create(HandleKind::Workbook, DropFlag(Arc::clone(&dropped)));

    assert!(registry.destroy(&id));
    assert!(dropped.load(Ordering::SeqCst), "payload dropped on destroy");
    assert!(!registry.destroy(&id));

    let error = registry
        .with_handle::<DropFlag, _, _>(&id, HandleKind::Workbook, |_| ())
        .expect_err("destroyed handle");
    assert_eq!(error, RegistryError::not_found(&id, HandleKind::Workbook));
}

#[rstest]
fn destroy_kind_ignores_other_kinds(registry: HandleRegistry) {
    let id = registry.create(HandleKind::Connection, ());
    assert!(!registry.destroy_kind(&id, HandleKind::Lock));
    assert!(registry.destroy_kind(&id, HandleKind::Connection));
}

#[rstest]
fn take_returns_payload_and_removes_handle(registry: HandleRegistry) {
    let id = registry.create(HandleKind::Lock, String::from("held"));
    assert!(registry.take::<u8>(&id, HandleKind::Lock).is_err());
    assert!(registry.contains(&id, HandleKind::Lock), "mismatched take restores handle");

    let payload = registry
        .take::<String>(&id, HandleKind::Lock)
        .expect("take payload");
    assert_eq!(payload, "held");
    assert!(registry.is_empty());
}

#[rstest]
fn create_with_skips_registration_on_failure(registry: HandleRegistry) {
    let result = registry.create_with::<u8, _, _>(HandleKind::Cipher, || Err("bad key"));
    assert_eq!(result, Err("bad key"));
    assert_eq!(registry.len(), 0);
}

#[rstest]
fn sweep_evicts_only_idle_handles(registry: HandleRegistry) {
    let stale = registry.create(HandleKind::Session, 0_u8);
    thread::sleep(Duration::from_millis(30));
    let fresh = registry.create(HandleKind::Session, 0_u8);

    let evicted = registry.sweep(Duration::from_millis(20));

    assert_eq!(evicted, 1);
    assert!(!registry.contains(&stale, HandleKind::Session));
    assert!(registry.contains(&fresh, HandleKind::Session));
    assert_eq!(registry.stats().destroyed, 1);
}

#[rstest]
fn sweep_skips_handles_in_use(registry: HandleRegistry) {
    let registry = Arc::new(registry);
    let id = registry.create(HandleKind::Session, 0_u8);
    thread::sleep(Duration::from_millis(20));

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let worker = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            registry
                .with_handle::<u8, _, _>(&id, HandleKind::Session, |_| {
                    entered.wait();
                    release.wait();
                })
                .expect("handle exists");
        })
    };

    entered.wait();
    // The worker touched the handle on entry, so make it look idle again.
    assert_eq!(registry.sweep(Duration::ZERO), 0, "busy handle must survive");
    release.wait();
    worker.join().expect("worker");
    assert!(registry.contains(&id, HandleKind::Session));
}

#[rstest]
fn destroy_waits_for_in_flight_use(registry: HandleRegistry) {
    let registry = Arc::new(registry);
    let dropped = Arc::new(AtomicBool::new(false));
    let id = registry.create(HandleKind::Connection, DropFlag(Arc::clone(&dropped)));
    let entered = Arc::new(Barrier::new(2));

    let worker = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        let entered = Arc::clone(&entered);
        let dropped = Arc::clone(&dropped);
        thread::spawn(move || {
            registry
                .with_handle::<DropFlag, _, _>(&id, HandleKind::Connection, |_| {
                    entered.wait();
                    thread::sleep(Duration::from_millis(50));
                    dropped.load(Ordering::SeqCst)
                })
                .expect("handle exists")
        })
    };

    entered.wait();
    assert!(registry.destroy(&id));
    let dropped_during_use = worker.join().expect("worker");
    assert!(!dropped_during_use, "payload dropped while still borrowed");
    assert!(dropped.load(Ordering::SeqCst));
}

#[rstest]
fn clear_destroys_everything(registry: HandleRegistry) {
    for kind in HandleKind::ALL {
        registry.create(kind, ());
    }
    let stats = registry.stats();
    assert_eq!(stats.live, HandleKind::ALL.len());
    assert_eq!(stats.by_kind.get(&HandleKind::Lock), Some(&1));

    assert_eq!(registry.clear(), HandleKind::ALL.len());
    assert!(registry.is_empty());
}

fn poison(registry: &Arc<HandleRegistry>, id: &HandleId, kind: HandleKind) {
    let registry = Arc::clone(registry);
    let id = id.clone();
    let outcome = thread::spawn(move || {
        registry
            .with_handle::<DropFlag, _, _>(&id, kind, |_| panic!("handler bug"))
            .ok();
    })
    .join();
    assert!(outcome.is_err(), "the operation panicked");
}

#[test]
fn panicking_users_leave_no_reusable_handle() {
    let registry = Arc::new(HandleRegistry::new());
    let dropped = Arc::new(AtomicBool::new(false));
    let id = registry.create(HandleKind::Connection, DropFlag(Arc::clone(&dropped)));
    poison(&registry, &id, HandleKind::Connection);

    assert!(!registry.contains(&id, HandleKind::Connection));
    let error = registry
        .with_handle::<DropFlag, _, _>(&id, HandleKind::Connection, |_| ())
        .expect_err("poisoned");
    assert!(matches!(error, RegistryError::Poisoned { .. }));
    assert!(dropped.load(Ordering::SeqCst));
    assert!(registry.is_empty());
}

#[test]
fn sweep_reclaims_poisoned_handles_before_they_idle_out() {
    let registry = Arc::new(HandleRegistry::new());
    let id = registry.create(
        HandleKind::Statement,
        DropFlag(Arc::new(AtomicBool::new(false))),
    );
    registry.create(HandleKind::Session, ());
    poison(&registry, &id, HandleKind::Statement);

    assert_eq!(registry.sweep(Duration::from_secs(3600)), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.stats().destroyed, 1);
}
