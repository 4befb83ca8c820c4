//! Mirror Maintenance Tool
//!
//! Opens the configured relational store and document mirror and repairs
//! the mirror.
//!
//! # Usage
//!
//! ```bash
//! # One reconcile pass over recorded drift (default)
//! cargo run --bin learnspace-sync
//!
//! # Rebuild the whole mirror from the relational store
//! cargo run --bin learnspace-sync -- --resync
//!
//! # Resync once, then keep repairing failed keys until Ctrl-C
//! cargo run --bin learnspace-sync -- --watch
//!
//! # Report store health (exit code 1 when a store is unreachable)
//! cargo run --bin learnspace-sync -- --check
//! ```
//!
//! # Configuration
//!
//! `LEARNSPACE_PRIMARY_PATH`, `LEARNSPACE_SECONDARY_PATH` (empty for an
//! in-memory mirror) and `LEARNSPACE_OPERATION_TIMEOUT_MS`. Log verbosity
//! follows `RUST_LOG` (default `info`).

use learnspace_core::config::SyncConfig;
use learnspace_core::services::{DbService, MirrorReconciler};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Reconcile,
    Resync,
    Watch,
    Check,
}

fn parse_mode(args: impl Iterator<Item = String>) -> anyhow::Result<Mode> {
    let mut mode = Mode::Reconcile;
    for arg in args {
        mode = match arg.as_str() {
            "--resync" => Mode::Resync,
            "--watch" => Mode::Watch,
            "--check" => Mode::Check,
            other => anyhow::bail!("Unknown argument: {} (expected --resync, --watch or --check)", other),
        };
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mode = parse_mode(std::env::args().skip(1))?;
    let config = SyncConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    println!("Opening primary store at {}", config.primary_path.display());
    match &config.secondary_path {
        Some(path) => println!("Opening mirror at {}", path.display()),
        None => println!("Mirror runs in memory"),
    }
    let service = DbService::open(config.clone()).await?;

    match mode {
        Mode::Check => {
            let health = service.health_check().await;
            report("primary", &health.primary);
            report("mirror", &health.secondary);
            if !health.is_healthy() {
                std::process::exit(1);
            }
        }
        Mode::Reconcile => {
            let report = service.reconcile_once().await;
            println!(
                "Reconciled: {} repaired, {} removed, {} still drifted",
                report.repaired, report.removed, report.still_drifted
            );
        }
        Mode::Resync => {
            let report = service.resync_all().await?;
            println!(
                "Resynced: {} mirrored, {} orphans removed, {} failed",
                report.mirrored, report.orphans_removed, report.failed
            );
        }
        Mode::Watch => {
            // drift is only known in-process, so seed the ledger with a full pass
            let initial = service.resync_all().await?;
            println!(
                "Initial resync: {} mirrored, {} failed",
                initial.mirrored, initial.failed
            );
            let reconciler =
                MirrorReconciler::start(service.reconciliation(), config.reconcile_interval());
            println!(
                "Reconciler running (tick every {}s), press Ctrl-C to stop",
                config.reconcile_interval_secs
            );
            tokio::signal::ctrl_c().await?;
            reconciler.shutdown();
        }
    }

    Ok(())
}

fn report(name: &str, status: &Result<(), String>) {
    match status {
        Ok(()) => println!("{}: ok", name),
        Err(e) => println!("{}: unreachable ({})", name, e),
    }
}
