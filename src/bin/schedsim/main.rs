//! schedsim: run scheduling simulations from JSON configurations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use schedsim::{parse_duration, Engine, SimConfig};

/// Run process-scheduling simulations from a JSON configuration.
#[derive(Parser)]
#[command(name = "schedsim", version)]
struct Cli {
    /// Path to a JSON configuration file.
    config: PathBuf,

    /// Override the configuration's PRNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop at this simulated time instead of running to completion.
    ///
    /// Accepts durations with units: "1s", "0.5s", "500ms", "100us",
    /// "1000ns". A bare number is interpreted as nanoseconds.
    #[arg(long, value_name = "DURATION", conflicts_with_all = ["steps", "runs"])]
    until: Option<String>,

    /// Execute this many steps (a step consumes all events at one
    /// timestamp) instead of running to completion.
    #[arg(long, value_name = "N", conflicts_with = "runs")]
    steps: Option<usize>,

    /// Execute N independent runs and report the reduced aggregates.
    #[arg(long, value_name = "N")]
    runs: Option<usize>,

    /// Log the full simulation event trace to stderr.
    #[arg(long)]
    dump_events: bool,

    /// Emit the result as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;

    let mut engine = Engine::new();
    let mut config = SimConfig::from_json(&text, &engine.policy_names())
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    if let Some(runs) = cli.runs {
        let reduced = engine
            .multi_run(config, runs)
            .context("running simulations")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&reduced)?);
        } else {
            println!("{} ({} runs)", reduced.name, reduced.runs);
            println!(
                "  load:        avg {:.4}  dev {:.4}",
                reduced.average_load.avg, reduced.average_load.dev
            );
            println!(
                "  latency:     avg-of-avgs {:.1}  dev-of-avgs {:.1}  avg-of-devs {:.1}",
                reduced.average_latency.avg_of_avgs,
                reduced.average_latency.dev_of_avgs,
                reduced.average_latency.avg_of_devs
            );
            println!(
                "  turnaround:  avg-of-avgs {:.1}  dev-of-avgs {:.1}  avg-of-devs {:.1}",
                reduced.average_turnaround.avg_of_avgs,
                reduced.average_turnaround.dev_of_avgs,
                reduced.average_turnaround.avg_of_devs
            );
            println!(
                "  ctx switches: avg {:.1}  dev {:.1}",
                reduced.context_switches.avg, reduced.context_switches.dev
            );
        }
        return Ok(());
    }

    engine.init(config).context("initialising simulation")?;
    let result = if let Some(until) = &cli.until {
        let t = parse_duration(until, 1)
            .with_context(|| format!("parsing --until {until:?}"))?;
        engine.run_until(t)
    } else if let Some(steps) = cli.steps {
        engine.step(steps)
    } else {
        engine.run()
    }
    .context("running simulation")?;

    if cli.dump_events {
        for event in &result.sim_events {
            eprintln!("{:>15} {:?}", event.time, event.kind);
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}  (finished: {})", result.name, result.finished);
        println!("  simulated:    {} ns of {} ns", result.run_time, result.length);
        println!("  real time:    {:.2} ms", result.duration_ms);
        println!("  ctx switches: {}", result.context_switches);
        if result.finished {
            println!("  avg load:     {:.4}", result.average_load);
            println!(
                "  avg latency:  {:.1} (dev {:.1})",
                result.average_latency.general.avg, result.average_latency.general.dev
            );
            println!(
                "  turnaround:   avg {:.1}  dev {:.1}  ({} exited, {} running)",
                result.average_turnaround.avg,
                result.average_turnaround.dev,
                result.average_turnaround.exited,
                result.average_turnaround.running
            );
            for class in &result.class_stats {
                println!(
                    "  class {:<10} latency avg {:.1} dev {:.1}",
                    class.class, class.avg_latency, class.latency_dev
                );
            }
            for proc in &result.process_stats {
                println!(
                    "  proc {:<12} exec {:>10}  wait {:>10}  picks {:>5}{}",
                    proc.pname,
                    proc.exec_time,
                    proc.wait_time,
                    proc.exec_count,
                    proc.turnaround
                        .map(|t| format!("  turnaround {t}"))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
