//! Summarise a result store
//!
//! Usage:
//!   cargo run --release --bin harvest -- results/stats.gamma.json

use std::env;
use std::process;

use tech_diversification::ledger::ResultStore;
use tech_diversification::STAT_NAMES;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tech_diversification=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <stats.json>", args[0]);
        process::exit(1);
    }

    let store = ResultStore::load(&args[1]).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = %args[1], "cannot read result store");
        process::exit(1);
    });
    if store.parameters().is_empty() {
        tracing::warn!(path = %args[1], "result store is empty");
        return;
    }
    if let Some(updated_at) = &store.updated_at {
        println!("Last updated {updated_at}");
    }

    for parameter in store.parameters() {
        for value in store.values(parameter) {
            let repetitions = store.completed_repetitions(parameter, value).len();
            println!("{parameter} = {value}: {repetitions} repetitions");
        }
    }

    for stat in STAT_NAMES {
        println!("\n{stat}");
        for parameter in store.parameters() {
            println!("{parameter}");
            for value in store.values(parameter) {
                let summary = store
                    .summary(parameter, value)
                    .into_iter()
                    .find(|(name, _)| *name == stat);
                match summary {
                    Some((_, s)) => println!("{:<8} {:>12.6} {:>12.6}", value, s.mean, s.std),
                    None => println!("{:<8} {:>12} {:>12}", value, "-", "-"),
                }
            }
        }
    }
}
