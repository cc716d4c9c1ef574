use quicksilver::config::Synchronicity;
use quicksilver::{Engine, IoHandleConfig};

fn open() -> (tempfile::TempDir, std::sync::Arc<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("tx.db"), IoHandleConfig::default()).unwrap();
    (dir, engine)
}

#[test]
fn engine_open_starts_with_a_transaction() {
    let (_dir, engine) = open();
    assert!(engine.io().in_transaction());
}

#[test]
fn commit_and_renew_keeps_a_transaction_open() {
    let (_dir, engine) = open();
    assert!(engine.io().commit(true));
    assert!(engine.io().in_transaction());
}

#[test]
fn commit_without_renew_closes_the_transaction() {
    let (_dir, engine) = open();
    assert!(engine.io().commit(false));
    assert!(!engine.io().in_transaction());
}

#[test]
fn rollback_with_no_open_transaction_is_reported_not_thrown() {
    let (_dir, engine) = open();
    engine.io().commit(false);
    assert!(!engine.io().rollback());
}

#[test]
fn set_synchronicity_mid_transaction_cycles_and_reopens() {
    let (_dir, engine) = open();
    assert!(engine.io().in_transaction());
    assert!(engine.io().set_synchronicity(Synchronicity::Full));
    assert!(engine.io().in_transaction());
    assert_eq!(engine.io().synchronicity(), Synchronicity::Full);
}

#[test]
fn vacuum_and_analyse_report_success() {
    let (_dir, engine) = open();
    assert!(engine.io().vacuum());
    assert!(engine.io().analyse());
}

#[test]
fn close_is_idempotent_enough_to_report_false_on_reuse() {
    let (_dir, engine) = open();
    assert!(engine.close());
    assert!(!engine.io().is_active());
}
