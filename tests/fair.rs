//! Fair policy: weight-proportional CPU shares.

use schedsim::{nice_to_weight, Engine, SimConfig};

mod common;

const MS: u64 = 1_000_000;

/// Four tasks at nice {-1, 0, 5, 6} receive CPU in proportion to their
/// weights over a one-second run.
#[test]
fn test_weight_proportional_shares() {
    common::setup_test();
    let config = SimConfig::builder("fair-pair")
        .sim_len(1_000 * MS)
        .timer_tick(MS)
        .default_policy("fair")
        .process("n-1", 0, common::behavior(-1, 40 * MS, MS))
        .process("n0", 0, common::behavior(0, 40 * MS, MS))
        .process("n5", 0, common::behavior(5, 40 * MS, MS))
        .process("n6", 0, common::behavior(6, 40 * MS, MS))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();
    assert!(result.finished);

    let exec = |name: &str| -> f64 {
        result
            .process_list
            .iter()
            .find(|p| p.pname == name)
            .unwrap()
            .exec_time as f64
    };
    for p in &result.process_list {
        assert!(p.exec_time > 0, "{} got no CPU", p.pname);
    }

    let ratio_hi = exec("n-1") / exec("n0");
    let expect_hi = nice_to_weight(-1) as f64 / nice_to_weight(0) as f64;
    assert!(
        (ratio_hi - expect_hi).abs() / expect_hi < 0.05,
        "nice -1 / nice 0 share {ratio_hi:.3}, expected {expect_hi:.3}"
    );

    let ratio_lo = exec("n5") / exec("n6");
    let expect_lo = nice_to_weight(5) as f64 / nice_to_weight(6) as f64;
    assert!(
        (ratio_lo - expect_lo).abs() / expect_lo < 0.10,
        "nice 5 / nice 6 share {ratio_lo:.3}, expected {expect_lo:.3}"
    );

    // Demand saturates the CPU.
    assert!(result.average_load > 0.99);

    // The class reports its final virtual-time floor.
    let fair_stats = result
        .class_stats
        .iter()
        .find(|c| c.class == "fair")
        .unwrap();
    let min_vruntime = fair_stats
        .extra
        .iter()
        .find(|(k, _)| k == "min_vruntime")
        .map(|(_, v)| *v)
        .unwrap();
    assert!(min_vruntime > 0.0);
}

/// A nice value outside -20..=19 is rejected at init.
#[test]
fn test_nice_out_of_range_rejected() {
    common::setup_test();
    let config = SimConfig::builder("fair-bad-nice")
        .sim_len(1000)
        .default_policy("fair")
        .process("p", 0, common::behavior(42, 10, 10))
        .build();

    let mut engine = Engine::new();
    assert!(engine.init(config).is_err());
}

/// Two equal tasks split the CPU evenly.
#[test]
fn test_equal_weights_split_evenly() {
    common::setup_test();
    let config = SimConfig::builder("fair-even")
        .sim_len(500 * MS)
        .timer_tick(MS)
        .default_policy("fair")
        .process("a", 0, common::behavior(0, 100 * MS, MS))
        .process("b", 0, common::behavior(0, 100 * MS, MS))
        .build();

    let mut engine = Engine::new();
    engine.init(config).unwrap();
    let result = engine.run().unwrap();

    let a = result.process_list[0].exec_time as f64;
    let b = result.process_list[1].exec_time as f64;
    let skew = (a - b).abs() / (a + b);
    assert!(skew < 0.05, "uneven split: {a} vs {b}");
}
