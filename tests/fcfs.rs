//! FCFS: arrival order, no preemption, full load under backlog.

use schedsim::{Engine, SimConfig, SimEventKind, Trace};

mod common;

fn trace_of(events: &[schedsim::SimEvent]) -> Trace {
    let mut trace = Trace::new(Vec::new());
    for e in events {
        trace.record(e.time, e.kind);
    }
    trace
}

/// Three staggered tasks on FCFS run strictly in arrival order and keep
/// the CPU saturated for the whole run.
#[test]
fn test_three_processes_arrival_order() {
    common::setup_test();
    let config = SimConfig::builder("fcfs-three")
        .sim_len(100)
        .timer_tick(20)
        .default_policy("fcfs")
        .process("a", 0, common::behavior(0, 5, 1))
        .process("b", 2, common::behavior(0, 10, 2))
        .process("c", 4, common::behavior(0, 7, 3))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let trace = trace_of(&result.sim_events);
    // First dispatch period: a, then b, then c.
    assert_eq!(trace.first_pick_order(), vec![1, 2, 3]);

    // FCFS never preempts on its own; the timer ticks must not either.
    assert!(
        !result
            .sim_events
            .iter()
            .any(|e| matches!(e.kind, SimEventKind::Preempt { .. })),
        "fcfs tasks must not be preempted"
    );

    assert!(result.context_switches >= 3);

    // Demand exceeds capacity throughout, so the CPU never idles.
    assert_eq!(result.idle_time, 0);
    assert!((result.average_load - 1.0).abs() < 1e-9);
}

/// Conservation: execution plus idle covers the whole run.
#[test]
fn test_exec_plus_idle_covers_run() {
    common::setup_test();
    let config = SimConfig::builder("fcfs-conservation")
        .sim_len(500)
        .timer_tick(20)
        .default_policy("fcfs")
        .process("a", 0, common::behavior(0, 5, 40))
        .process("b", 10, common::behavior(0, 3, 70))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let busy: u64 = result.process_list.iter().map(|p| p.exec_time).sum();
    assert_eq!(busy + result.idle_time, result.run_time);
    assert!(result.average_load > 0.0 && result.average_load < 1.0);
}
