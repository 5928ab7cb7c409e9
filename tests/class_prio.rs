//! Class priority cascade: a newly-runnable task of a higher class always
//! preempts a lower-class current task at the event that wakes it.

use schedsim::{Engine, SimConfig, SimEventKind};

mod common;

#[test]
fn test_higher_class_preempts_on_wakeup() {
    common::setup_test();
    let config = SimConfig::builder("cascade")
        .sim_len(100)
        .class_prio(&["fcfs", "round", "sjf", "original"])
        .process_full(
            "top",
            schedsim::TimeValue::Fixed(0),
            "fcfs",
            common::behavior(0, 5, 12),
            vec![],
        )
        .process_full(
            "second",
            schedsim::TimeValue::Fixed(1),
            "round",
            common::behavior(0, 5, 12),
            vec![],
        )
        .process_full(
            "third",
            schedsim::TimeValue::Fixed(2),
            "sjf",
            common::behavior(0, 5, 12),
            vec![],
        )
        .process_full(
            "fourth",
            schedsim::TimeValue::Fixed(3),
            "original",
            common::behavior(5, 5, 12),
            vec![],
        )
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);
    assert_eq!(
        result.active_classes,
        vec!["fcfs", "round", "sjf", "original"]
    );

    // The top class spawned first and outranks everyone: it runs first.
    let first_picks: Vec<i32> = {
        let mut seen = Vec::new();
        for e in &result.sim_events {
            if let SimEventKind::Pick { pid } = e.kind {
                if pid != 0 && !seen.contains(&pid) {
                    seen.push(pid);
                }
            }
        }
        seen
    };
    assert_eq!(first_picks, vec![1, 2, 3, 4]);

    // Every wakeup of the top-class task must win the CPU at that very
    // instant, whoever is running.
    let top_pid = 1;
    for e in &result.sim_events {
        if let SimEventKind::Enqueue { pid } = e.kind {
            if pid == top_pid {
                assert!(
                    result
                        .sim_events
                        .iter()
                        .any(|p| p.time == e.time
                            && matches!(p.kind, SimEventKind::Pick { pid } if pid == top_pid)),
                    "top-class wakeup at t={} did not dispatch immediately",
                    e.time
                );
            }
        }
    }

    // All four tasks made progress.
    for proc in &result.process_list {
        assert!(proc.exec_count > 0, "{} never ran", proc.pname);
    }
}
