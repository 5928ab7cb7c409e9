//! Round-Robin: slice rotation and equal sharing.

use schedsim::{Engine, SimConfig, SimEventKind};
use serde_json::json;

mod common;

/// Three equal tasks share the CPU within one slice of each other, and no
/// single execution span exceeds the slice.
#[test]
fn test_equal_tasks_share_within_one_slice() {
    common::setup_test();
    let config = SimConfig::builder("rr-equal")
        .sim_len(100)
        .timer_tick(5)
        .default_policy("round")
        .class_param("round", json!({ "time_slice": 5 }))
        .process("a", 0, common::behavior(0, 20, 10))
        .process("b", 0, common::behavior(0, 20, 10))
        .process("c", 0, common::behavior(0, 20, 10))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    // No execution span may exceed the slice.
    for proc in &result.process_list {
        for &span in &proc.run_log {
            assert!(
                span <= 5,
                "{}: run span {span} exceeds the 5ns slice",
                proc.pname
            );
        }
    }

    // Shares within one slice of each other.
    let execs: Vec<u64> = result.process_list.iter().map(|p| p.exec_time).collect();
    let max = *execs.iter().max().unwrap();
    let min = *execs.iter().min().unwrap();
    assert!(
        max - min <= 5,
        "unfair split: exec times {execs:?} differ by more than one slice"
    );

    // Slice exhaustion must actually preempt.
    assert!(result
        .sim_events
        .iter()
        .any(|e| matches!(e.kind, SimEventKind::Preempt { .. })));
}

/// A lone task whose slice expires keeps the CPU: there is nobody to
/// rotate to, so the dispatch re-picks it and the burst completes intact.
#[test]
fn test_lone_task_survives_slice_expiry() {
    common::setup_test();
    let config = SimConfig::builder("rr-lone")
        .sim_len(100)
        .timer_tick(5)
        .default_policy("round")
        .class_param("round", json!({ "time_slice": 5 }))
        .process("only", 0, common::behavior(0, 40, 10))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let proc = &result.process_list[0];
    // 40ns burst, 10ns block, 40ns burst, ... => 80ns executed by t=100.
    assert_eq!(proc.exec_time, 80);
    assert_eq!(result.idle_time, 20);
}

/// The slice parameter is validated.
#[test]
fn test_bad_time_slice_rejected() {
    common::setup_test();
    let config = SimConfig::builder("rr-bad")
        .sim_len(100)
        .default_policy("round")
        .class_param("round", json!({ "time_slice": 0 }))
        .process("a", 0, common::behavior(0, 5, 5))
        .build();

    let mut engine = Engine::new();
    assert!(engine.init(config).is_err());
}
