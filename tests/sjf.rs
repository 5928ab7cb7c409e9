//! SJF starvation and SRTF preemption.

use schedsim::{Engine, SimConfig, SimEventKind};
use serde_json::json;

mod common;

/// Non-preemptive SJF: four short tasks keep a back-to-back supply of
/// shorter bursts, so the long task starves for the whole run.
#[test]
fn test_short_tasks_starve_long_one() {
    common::setup_test();
    let mut builder = SimConfig::builder("sjf-starvation")
        .sim_len(200)
        .default_policy("sjf");
    for name in ["s1", "s2", "s3", "s4"] {
        builder = builder.process(name, 0, common::behavior(0, 5, 12));
    }
    let config = builder
        .process("long", 0, common::behavior(0, 10, 5))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let long = result
        .process_list
        .iter()
        .find(|p| p.pname == "long")
        .unwrap();
    assert_eq!(long.exec_count, 0, "the long task should never be picked");
    assert_eq!(long.exec_time, 0);

    // The shorts saturate the CPU.
    assert_eq!(result.idle_time, 0);
    for proc in result.process_list.iter().filter(|p| p.pname != "long") {
        assert!(proc.exec_count > 0);
    }
}

/// SRTF: shorts arriving while the long task runs preempt it the moment
/// they enqueue, because their remaining runtime is smaller.
#[test]
fn test_early_preemption_turns_sjf_into_srtf() {
    common::setup_test();
    let mut builder = SimConfig::builder("srtf")
        .sim_len(200)
        .default_policy("sjf")
        .class_param("sjf", json!({ "early_preemption": true }))
        .process("long", 0, common::behavior(0, 30, 5));
    for (i, name) in ["s1", "s2", "s3", "s4"].iter().enumerate() {
        builder = builder.process(name, (i as u64) + 1, common::behavior(0, 5, 38));
    }
    let config = builder.build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let long_pid = 1;
    // The long task starts alone at t=0; the first short (pid 2) forks at
    // t=1 with a 5ns burst against 29ns left and must win the CPU there.
    let s1_pid = 2;
    assert!(
        result.sim_events.iter().any(|e| e.time == 1
            && matches!(e.kind, SimEventKind::Pick { pid } if pid == s1_pid)),
        "first short did not preempt the long task at t=1"
    );
    // Every preemption of the long task coincides with a short becoming
    // runnable at that instant.
    let long_preempts: Vec<u64> = result
        .sim_events
        .iter()
        .filter(|e| matches!(e.kind, SimEventKind::Preempt { pid } if pid == long_pid))
        .map(|e| e.time)
        .collect();
    assert!(!long_preempts.is_empty());
    for t in &long_preempts {
        assert!(
            result.sim_events.iter().any(|e| e.time == *t
                && matches!(
                    e.kind,
                    SimEventKind::Fork { pid } | SimEventKind::Enqueue { pid } if pid != long_pid
                )),
            "long task preempted at t={t} without a shorter arrival"
        );
    }

    let long = result
        .process_list
        .iter()
        .find(|p| p.pname == "long")
        .unwrap();
    assert!(long.exec_count >= 2, "the long task must resume after preemption");
}

/// Without early preemption the same arrival pattern lets the long task
/// finish its burst untouched.
#[test]
fn test_no_preemption_without_flag() {
    common::setup_test();
    let mut builder = SimConfig::builder("sjf-plain")
        .sim_len(60)
        .default_policy("sjf")
        .process("long", 0, common::behavior(0, 30, 5));
    for (i, name) in ["s1", "s2"].iter().enumerate() {
        builder = builder.process(name, (i as u64) + 1, common::behavior(0, 5, 38));
    }
    let config = builder.build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();

    let long_pid = 1;
    assert!(
        !result
            .sim_events
            .iter()
            .any(|e| matches!(e.kind, SimEventKind::Preempt { pid } if pid == long_pid)),
        "non-preemptive sjf must let the burst finish"
    );
    let long = result
        .process_list
        .iter()
        .find(|p| p.pname == "long")
        .unwrap();
    // First burst runs 0..30 uninterrupted.
    assert!(long.run_log.first().is_some_and(|&s| s == 30));
}
