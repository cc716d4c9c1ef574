use quicksilver::{Engine, IoHandleConfig};

fn open() -> (tempfile::TempDir, std::sync::Arc<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("counter.db"), IoHandleConfig::default()).unwrap();
    (dir, engine)
}

#[test]
fn counter_increments_per_table() {
    let (_dir, engine) = open();
    let counters = engine.counters();

    assert_eq!(counters.next_model_id("jobs"), 1);
    assert_eq!(counters.next_model_id("jobs"), 2);
    assert_eq!(counters.next_model_id("jobs"), 3);
}

#[test]
fn counters_are_independent_per_table_name() {
    let (_dir, engine) = open();
    let counters = engine.counters();

    assert_eq!(counters.next_model_id("jobs"), 1);
    assert_eq!(counters.next_model_id("widgets"), 1);
    assert_eq!(counters.next_model_id("jobs"), 2);
    assert_eq!(counters.next_model_id("widgets"), 2);
}

#[test]
fn set_next_model_id_overrides_the_sequence() {
    let (_dir, engine) = open();
    let counters = engine.counters();

    counters.next_model_id("jobs");
    counters.set_next_model_id("jobs", 100);
    assert_eq!(counters.next_model_id("jobs"), 100);
}

#[test]
fn counter_survives_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.db");

    {
        let engine = Engine::open(&path, IoHandleConfig::default()).unwrap();
        engine.counters().next_model_id("jobs");
        engine.counters().next_model_id("jobs");
        engine.write_queue().wait_for_outstanding_operations();
        engine.close();
    }

    let engine = Engine::open(&path, IoHandleConfig::default()).unwrap();
    assert_eq!(engine.counters().next_model_id("jobs"), 3);
}
