// src/main.rs
//
// CLI surface (spec.md §6): loads configuration, initializes logging, and
// drives the experiment harness for a named scenario.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dhtsim::config::SimConfig;
use dhtsim::experiment;
use dhtsim::logging;

/// Kademlia DHT node and deterministic tick-based simulation harness.
#[derive(Parser, Debug)]
#[command(name = "dhtsim", version, about)]
struct Cli {
    /// Scenario to run. Pass `list` to print the available names.
    #[arg(long)]
    scenario: String,

    /// Optional TOML config file layered under CLI flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bucket size.
    #[arg(long)]
    k: Option<usize>,

    /// Outstanding-probe cap per lookup.
    #[arg(long)]
    alpha: Option<u32>,

    /// Maintenance period, in ticks.
    #[arg(long = "mp")]
    maintenance_period: Option<u64>,

    /// Bucket refresh period, in ticks.
    #[arg(long = "rp")]
    bucket_refresh_period: Option<u64>,

    /// Per-tick link byte budget.
    #[arg(long = "ll")]
    link_limit: Option<usize>,

    /// Number of nodes a scenario should spawn, where it spawns its own.
    #[arg(long = "nn")]
    node_count: Option<usize>,

    /// RNG seed, for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Log level / filter directive (e.g. "info", "dhtsim=debug").
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    if cli.scenario == "list" {
        for name in experiment::scenario_names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    let mut cfg = match &cli.config {
        Some(path) => match SimConfig::load_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => SimConfig::default(),
    };

    if let Some(k) = cli.k {
        cfg.k = k;
    }
    if let Some(alpha) = cli.alpha {
        cfg.alpha = alpha;
    }
    if let Some(mp) = cli.maintenance_period {
        cfg.maintenance_period = mp;
    }
    if let Some(rp) = cli.bucket_refresh_period {
        cfg.bucket_refresh_period = rp;
    }
    if let Some(ll) = cli.link_limit {
        cfg.link_limit = ll;
    }
    if let Some(nn) = cli.node_count {
        cfg.node_count = nn;
    }
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }

    dhtsim::rng::seed(cfg.seed);

    match experiment::run_scenario(&cli.scenario, &cfg) {
        Ok(report) if report.passed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
