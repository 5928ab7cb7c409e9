//! Statistics: running per-class counters, derived rollups, and the result
//! object a finished (or interrupted) run yields.
//!
//! Latency accounting follows the sampling scheme of the engine: every
//! scheduling decision flushes `(now - latency_update) * nr_waiting` into a
//! per-class cumulative sum and logs the sample. Per-task logs record
//! individual execution and waiting spans instead.

use serde::Serialize;

use crate::types::TimeNs;

/// Summary statistics for a distribution of values.
#[derive(Debug, Clone, Default)]
pub struct DistributionStats {
    /// Number of samples.
    pub count: usize,
    /// Minimum value (or 0 if empty).
    pub min: f64,
    /// Maximum value (or 0 if empty).
    pub max: f64,
    /// Sum of all values.
    pub sum: f64,
    /// Sum of squares (for variance calculation).
    sum_sq: f64,
}

impl DistributionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an iterator of samples.
    pub fn from_samples<I: IntoIterator<Item = f64>>(samples: I) -> Self {
        let mut stats = Self::new();
        for s in samples {
            stats.add(s);
        }
        stats
    }

    /// Add a sample value.
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Mean value (or 0 if empty).
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population standard deviation (or 0 if fewer than two samples).
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            let mean = self.mean();
            let variance = self.sum_sq / self.count as f64 - mean * mean;
            variance.max(0.0).sqrt()
        }
    }

    /// Mean and deviation as a report pair.
    pub fn avg_dev(&self) -> AvgDev {
        AvgDev {
            avg: self.mean(),
            dev: self.stddev(),
        }
    }
}

/// A mean/deviation pair, the unit most rollups are reported in.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct AvgDev {
    pub avg: f64,
    pub dev: f64,
}

/// Running counters the engine maintains for one scheduling class.
#[derive(Debug, Clone, Default)]
pub struct ClassCounters {
    /// Alive and runnable tasks of this class.
    pub nr_running: u32,
    /// Runnable tasks of this class not currently executing.
    pub nr_waiting: u32,
    /// Cumulative waiting time across all waiting tasks of the class.
    pub latency_sum: u128,
    /// Instant of the last flush.
    pub latency_update: TimeNs,
    /// `(now, latency_sum)` samples, one per scheduling decision.
    pub latency_log: Vec<(TimeNs, u128)>,
}

impl ClassCounters {
    /// Fold the elapsed waiting time into the sum and log a sample. Called
    /// before any state change that affects `nr_waiting`, and on every
    /// scheduling decision.
    pub fn flush(&mut self, now: TimeNs) {
        self.latency_sum += (now - self.latency_update) as u128 * self.nr_waiting as u128;
        self.latency_update = now;
        self.latency_log.push((now, self.latency_sum));
    }

    /// Mean/deviation of the logged cumulative samples.
    pub fn latency_stats(&self) -> AvgDev {
        DistributionStats::from_samples(self.latency_log.iter().map(|&(_, s)| s as f64)).avg_dev()
    }
}

/// Per-class entry in the result's latency breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ClassLatency {
    pub class: String,
    #[serde(flatten)]
    pub latency: AvgDev,
}

/// What `get_class_stats` of a policy reports: at minimum the class's
/// average latency and its deviation, plus policy-specific extras.
#[derive(Debug, Clone, Serialize)]
pub struct ClassStatsReport {
    pub class: String,
    pub avg_latency: f64,
    pub latency_dev: f64,
    /// Policy-specific named figures (e.g. array swaps for O(1)).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, f64)>,
}

/// Turnaround rollup over exited tasks.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TurnaroundReport {
    pub avg: f64,
    pub dev: f64,
    /// Tasks that exited before the run ended.
    pub exited: usize,
    /// Tasks still alive when the run ended.
    pub running: usize,
}

/// Final state snapshot of one task, kept even for aborted runs.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: i32,
    pub pname: String,
    pub policy: String,
    pub alive: bool,
    pub runnable: bool,
    pub spawned: TimeNs,
    pub exited: Option<TimeNs>,
    pub exec_count: u64,
    pub exec_time: TimeNs,
    pub wait_time: TimeNs,
    pub remaining_runtime: TimeNs,
    pub run_log: Vec<TimeNs>,
    pub latency_log: Vec<TimeNs>,
    pub exec_log: Vec<(TimeNs, TimeNs)>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// Derived per-task statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    pub pid: i32,
    pub pname: String,
    pub exec_time: TimeNs,
    pub wait_time: TimeNs,
    pub exec_count: u64,
    pub run: AvgDev,
    pub latency: AvgDev,
    /// `exited - spawned`, when the task exited.
    pub turnaround: Option<TimeNs>,
}

impl ProcessStats {
    pub fn from_snapshot(snap: &ProcessSnapshot) -> Self {
        ProcessStats {
            pid: snap.pid,
            pname: snap.pname.clone(),
            exec_time: snap.exec_time,
            wait_time: snap.wait_time,
            exec_count: snap.exec_count,
            run: DistributionStats::from_samples(snap.run_log.iter().map(|&v| v as f64)).avg_dev(),
            latency: DistributionStats::from_samples(snap.latency_log.iter().map(|&v| v as f64))
                .avg_dev(),
            turnaround: snap.exited.map(|e| e - snap.spawned),
        }
    }
}

/// Latency breakdown: overall plus per class.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyReport {
    pub general: AvgDev,
    pub by_class: Vec<ClassLatency>,
}

/// The result of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimResult {
    pub name: String,
    /// Wall-clock milliseconds the run took to compute.
    pub duration_ms: f64,
    /// False for partial runs (`run_until`, `step`) and aborts; partial
    /// results carry no aggregate statistics.
    pub finished: bool,
    /// Simulated time actually covered.
    pub run_time: TimeNs,
    /// Configured `sim_len`.
    pub length: TimeNs,
    pub context_switches: u64,
    pub process_list: Vec<ProcessSnapshot>,
    pub sim_events: Vec<crate::trace::SimEvent>,
    /// Time the idle task held the CPU, accounted from its own dispatch
    /// spans. `idle_time` plus every task's `exec_time` covers `run_time`.
    pub idle_time: TimeNs,
    /// Fraction of `run_time` spent running a non-idle task.
    pub average_load: f64,
    pub average_latency: LatencyReport,
    pub average_turnaround: TurnaroundReport,
    /// Classes referenced by at least one task, in priority order.
    pub active_classes: Vec<String>,
    pub class_stats: Vec<ClassStatsReport>,
    pub process_stats: Vec<ProcessStats>,
}

/// Reduction of one aggregate across N runs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Reduced {
    /// Average of the per-run averages.
    pub avg_of_avgs: f64,
    /// Standard deviation of the per-run averages.
    pub dev_of_avgs: f64,
    /// Average of the per-run deviations.
    pub avg_of_devs: f64,
}

impl Reduced {
    fn from_pairs(pairs: &[AvgDev]) -> Self {
        let avgs = DistributionStats::from_samples(pairs.iter().map(|p| p.avg));
        let devs = DistributionStats::from_samples(pairs.iter().map(|p| p.dev));
        Reduced {
            avg_of_avgs: avgs.mean(),
            dev_of_avgs: avgs.stddev(),
            avg_of_devs: devs.mean(),
        }
    }
}

/// The reduction of N independent runs of one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct MultiRunResult {
    pub name: String,
    pub runs: usize,
    pub average_load: AvgDev,
    pub average_latency: Reduced,
    pub average_turnaround: Reduced,
    pub context_switches: AvgDev,
}

impl MultiRunResult {
    /// Reduce per-run aggregates. Partial results are not accepted; the
    /// multi-run driver only produces finished runs.
    pub fn reduce(name: &str, results: &[SimResult]) -> Self {
        debug_assert!(results.iter().all(|r| r.finished));
        let loads = DistributionStats::from_samples(results.iter().map(|r| r.average_load));
        let switches =
            DistributionStats::from_samples(results.iter().map(|r| r.context_switches as f64));
        let latencies: Vec<AvgDev> = results
            .iter()
            .map(|r| r.average_latency.general)
            .collect();
        let turnarounds: Vec<AvgDev> = results
            .iter()
            .map(|r| AvgDev {
                avg: r.average_turnaround.avg,
                dev: r.average_turnaround.dev,
            })
            .collect();
        MultiRunResult {
            name: name.to_string(),
            runs: results.len(),
            average_load: loads.avg_dev(),
            average_latency: Reduced::from_pairs(&latencies),
            average_turnaround: Reduced::from_pairs(&turnarounds),
            context_switches: switches.avg_dev(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_stats_empty() {
        let stats = DistributionStats::new();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.stddev(), 0.0);
    }

    #[test]
    fn test_distribution_stats_multiple() {
        let stats = DistributionStats::from_samples([100.0, 200.0, 300.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 300.0);
        assert_eq!(stats.mean(), 200.0);
        // population stddev of [100,200,300] is ~81.65
        assert!(stats.stddev() > 80.0 && stats.stddev() < 83.0);
    }

    #[test]
    fn test_class_counters_flush() {
        let mut c = ClassCounters {
            nr_waiting: 2,
            ..Default::default()
        };
        c.flush(10);
        assert_eq!(c.latency_sum, 20);
        c.nr_waiting = 1;
        c.flush(15);
        assert_eq!(c.latency_sum, 25);
        assert_eq!(c.latency_log, vec![(10, 20), (15, 25)]);
    }

    #[test]
    fn test_flush_idempotent_at_same_instant() {
        let mut c = ClassCounters {
            nr_waiting: 3,
            ..Default::default()
        };
        c.flush(5);
        let sum = c.latency_sum;
        c.flush(5);
        assert_eq!(c.latency_sum, sum);
    }

    #[test]
    fn test_reduced_from_pairs() {
        let pairs = [
            AvgDev { avg: 10.0, dev: 1.0 },
            AvgDev { avg: 20.0, dev: 3.0 },
        ];
        let r = Reduced::from_pairs(&pairs);
        assert_eq!(r.avg_of_avgs, 15.0);
        assert_eq!(r.avg_of_devs, 2.0);
        assert_eq!(r.dev_of_avgs, 5.0);
    }
}
