//! Parameter sweep runner
//!
//! Usage:
//!   cargo run --release --bin tech_diversification -- experiments/gamma_sweep.toml
//!
//! Re-running the same experiment resumes it: repetitions already in the
//! result store are skipped.

use std::env;
use std::process;
use std::time::Instant;

use tech_diversification::config::ExperimentConfig;
use tech_diversification::sweep::{run_sweep, SweepReport};
use tech_diversification::Result;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tech_diversification=info,des=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <experiment_config.toml>", args[0]);
        eprintln!("Example: {} experiments/gamma_sweep.toml", args[0]);
        process::exit(1);
    }

    if let Err(e) = run(&args[1]) {
        tracing::error!(error = %e, "sweep aborted");
        process::exit(1);
    }
}

fn run(config_path: &str) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    let countries = config.load_countries()?;
    let sweep = config.sweep_config()?;
    let dispatcher = config.dispatcher()?;
    let mut stores = config.stores()?;

    println!("=== Technological Diversification ===");
    println!("Experiment: {}", config.experiment.name);
    if !config.experiment.description.is_empty() {
        println!("{}", config.experiment.description);
    }
    println!(
        "Sweeping {} over {:?}: {} countries, {} repetitions, {} periods\n",
        sweep.parameter,
        sweep.values,
        countries.len(),
        sweep.repetitions,
        sweep.periods
    );

    let start = Instant::now();
    let report = run_sweep(
        &config.model,
        &config.calibration,
        &countries,
        &sweep,
        &dispatcher,
        &mut stores,
    )?;
    tracing::info!(elapsed = ?start.elapsed(), "sweep finished");

    if config.output.write_summary_csv {
        let path = config.output.summary_csv_path(sweep.parameter);
        stores.results.write_summary_csv(&path)?;
        println!("Summary written to {}", path.display());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &SweepReport) {
    println!(
        "\n{:<10} {:>10} {:<20} {:>12} {:>12}",
        report.parameter.name(),
        "reps",
        "statistic",
        "mean",
        "std"
    );
    println!("{:-<10} {:->10} {:-<20} {:->12} {:->12}", "", "", "", "", "");
    for value in &report.values {
        let reps = format!("{}/{}", value.completed, value.requested);
        for (stat, summary) in &value.summaries {
            println!(
                "{:<10} {:>10} {:<20} {:>12.5} {:>12.5}",
                value.value, reps, stat, summary.mean, summary.std
            );
        }
        if value.shortfall() > 0 {
            println!(
                "{:<10} shortfall of {} repetitions ({} failed this run)",
                value.value,
                value.shortfall(),
                value.failures
            );
        }
    }
}
