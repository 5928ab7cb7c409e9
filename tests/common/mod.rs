use schedsim::{BehaviorSpec, TimeValue};

/// Initialise tracing from `RUST_LOG`. `try_init()` is idempotent: the
/// first call in the process succeeds, subsequent calls are silently
/// ignored.
pub fn setup_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// A fixed `{priority, run, block}` behaviour triple.
pub fn behavior(priority: i64, run: u64, block: u64) -> BehaviorSpec {
    BehaviorSpec {
        priority,
        run: TimeValue::Fixed(run),
        block: TimeValue::Fixed(block),
    }
}
