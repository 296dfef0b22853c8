//! The `chainsim` CLI (specification §6): one entry point, `--config
//! <path>`, exit 0 on success and nonzero on any unrecoverable failure.
//!
//! Grounded on `examples/TimelyDataflow-timely-dataflow/communication/src/
//! initialize.rs`'s `Configuration::from_args`: a deliberate `getopts`
//! choice over the `clap` seen elsewhere in the pack, since the teacher
//! already solves this exact "parse a handful of flags into a typed
//! config" problem in this style.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;

use chainsim::config::{self, TopologyFile};
use chainsim::error::SimError;
use chainsim::kernel::{Kernel, SimTime};
use chainsim::scheduler::Scheduler;
use chainsim::stats::JobSummary;
use chainsim::workload;

/// Virtual-time horizon the kernel is given before a run is declared
/// stalled (specification §7). Generous relative to any realistic trace's
/// makespan; traces needing more should become a CLI flag, not a larger
/// constant.
const DEFAULT_HORIZON: f64 = 1.0e12;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("chainsim: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let config_path = parse_args()?;
    let yaml = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading topology file {}", config_path.display()))?;
    let doc = TopologyFile::parse(&yaml).map_err(SimError::from)?;

    let summaries = simulate(&doc)?;
    write_statistics(&doc.benchmark.statistics, &summaries)
        .with_context(|| format!("writing statistics to {}", doc.benchmark.statistics))?;
    Ok(())
}

/// Parses `--config <PATH>` (`-c` short form). `--help` prints usage and
/// exits zero, matching `getopts::Options::usage`'s own convention.
fn parse_args() -> anyhow::Result<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = getopts::Options::new();
    opts.reqopt("c", "config", "path to the run's topology YAML", "PATH");
    opts.optflag("h", "help", "print this help and exit");

    let usage = || opts.usage("Usage: chainsim --config <PATH>");
    match opts.parse(&args[1..]) {
        Ok(matches) if matches.opt_present("h") => {
            println!("{}", usage());
            std::process::exit(0);
        }
        Ok(matches) => Ok(PathBuf::from(matches.opt_str("c").expect("reqopt guarantees presence"))),
        Err(e) => anyhow::bail!("{e}\n\n{}", usage()),
    }
}

/// Builds the cluster, admits every configured workload, and drives the
/// kernel to completion (or a stall).
fn simulate(doc: &TopologyFile) -> Result<Vec<JobSummary>, SimError> {
    let built = config::build_cluster(doc)?;
    let scheduler = Scheduler::new(built.policy, built.cluster, built.prefetch);
    let kernel = Kernel::new();
    kernel.set_horizon(SimTime::new(DEFAULT_HORIZON));

    let workload_dir = Path::new(&doc.benchmark.workloaddir);
    let expected = doc.benchmark.workloads.len();
    for name in &doc.benchmark.workloads {
        let (job, hints) = workload::load_job(workload_dir, name)?;
        Scheduler::admit(&scheduler, &kernel, job, hints)?;
    }

    let mut kernel = kernel;
    let drained = kernel.run();
    if let Some(net_err) = kernel.take_net_error() {
        return Err(SimError::from(net_err));
    }
    let results = scheduler.results();
    if results.len() < expected {
        if let Some(msg) = scheduler.first_error() {
            tracing::error!(error = %msg, "scheduler reported a deferred dispatch failure");
        } else if !drained {
            tracing::error!("kernel horizon reached with jobs still pending");
        }
        return Err(SimError::Stalled { pending: expected - results.len() });
    }
    Ok(results)
}

/// Writes the statistics CSV (specification §6): a header row followed by
/// one [`JobSummary::to_csv_row`] line per completed job.
fn write_statistics(path: &str, summaries: &[JobSummary]) -> std::io::Result<()> {
    let mut out = String::from("name,policy,execution_time,remote_read,local_read,transmit_time,cpu_time,deser_time,ser_time,task_time\n");
    for s in summaries {
        out.push_str(&s.to_csv_row());
        out.push('\n');
    }
    std::fs::write(path, out)
}
