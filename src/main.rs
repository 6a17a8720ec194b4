//! Example run: host-only baseline vs the same workload with offload regions.

use clap::Parser;
use pim_timing_sim::config::SimConfig;
use pim_timing_sim::metrics::Metrics;
use pim_timing_sim::simulator::Simulator;
use pim_timing_sim::workload::build_workload;
use pim_timing_sim::{CoreKind, SimError};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(clap::Parser, Debug)]
#[command(name = "pim-timing-sim")]
#[command(about = "Lockstep multicore timing run with processing-in-memory offload accounting")]
struct Args {
    /// JSON configuration; omitted fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    cores: Option<usize>,

    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, value_enum)]
    kind: Option<CoreKind>,

    /// Fraction of blocks run inside offload regions in the second run.
    #[arg(long, default_value_t = 0.5)]
    offload_fraction: f64,

    /// Print statistics as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    baseline: &'a Metrics,
    offload: &'a Metrics,
    speedup: f64,
}

fn load_config(args: &Args) -> Result<SimConfig, SimError> {
    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(cores) = args.cores {
        config.num_cores = cores;
    }
    if let Some(threads) = args.threads {
        config.num_threads = threads;
    }
    if let Some(kind) = args.kind {
        config.core.kind = kind;
    }
    config.validate()?;
    Ok(config)
}

fn run_benchmark(config: &SimConfig, offload_fraction: f64) -> Result<Metrics, SimError> {
    let mut config = config.clone();
    config.workload.offload_fraction = offload_fraction;
    let workload = build_workload(config.num_threads, &config.workload);
    let mut sim = Simulator::new(config)?;
    sim.load_workload(workload)?;
    Ok(sim.run_to_completion()?.clone())
}

fn print_metrics(title: &str, m: &Metrics) {
    println!("--- {} ---", title);
    println!("  Total cycles:         {}", m.total_cycles);
    println!("  Phases:               {}", m.phases);
    println!("  Instructions:         {}", m.instrs);
    println!("  Offloaded:            {} ({:.2}%)", m.offload_instrs, m.offload_fraction() * 100.0);
    println!("  Memory instructions:  {}", m.mem_instrs);
    println!("  Memory stall cycles:  {}", m.memory_stall_cycles);
    println!("  Shared stall share:   {:.2}%", m.shared_stall_fraction() * 100.0);
    println!("  Contention cycles:    {}", m.contention_cycles);
    for s in m.per_core.values() {
        println!(
            "  {:>8}: {} instrs, {} unhalted / {} halted cycles, IPC {:.3}",
            s.name,
            s.instrs,
            s.unhalted_cycles,
            s.halted_cycles,
            s.ipc()
        );
    }
}

fn run(args: &Args) -> Result<(), SimError> {
    let config = load_config(args)?;
    let baseline = run_benchmark(&config, 0.0)?;
    let offload = run_benchmark(&config, args.offload_fraction)?;
    let speedup = offload.speedup_vs(baseline.total_cycles);

    if args.json {
        let report = Report {
            baseline: &baseline,
            offload: &offload,
            speedup,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== PIM Timing Simulator ===\n");
    print_metrics("Baseline (host only)", &baseline);
    println!();
    print_metrics(
        &format!("Offload ({:.0}% of blocks)", args.offload_fraction * 100.0),
        &offload,
    );
    println!("\n  Speedup vs baseline:  {:.3}x", speedup);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("simulation failed: {}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
