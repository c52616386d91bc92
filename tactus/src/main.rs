/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Tactus diagnostic binary.
//!
//! Runs a two-task workload that mirrors the canonical robot-control setup:
//! a 1 ms high-priority task measuring its own firing interval, and a 1 s
//! low-priority task reporting the measurements.  Useful for eyeballing the
//! scheduling quality of a host before trusting it with a real control loop.

use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tactus::{FaultLatch, Scheduler, SchedulerConfig, StopToken};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Tactus periodic scheduler diagnostic.
///
/// Example:
///   tactus -r 10 --restart --config demos/tactus.yaml
#[derive(Debug, Parser)]
#[command(
    name = "tactus",
    about = "Tactus periodic scheduler – diagnostic workload",
    long_about = None,
)]
struct Cli {
    /// Seconds to run the high-priority measurement task for.
    #[arg(short = 'r', long = "runsecs", default_value_t = 5)]
    run_secs: u64,

    /// Stop, wait two seconds, then start the same scheduler again.
    #[arg(long = "restart", default_value_t = false)]
    restart: bool,

    /// Path to the YAML scheduler configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

// ── Shared measurement state ──────────────────────────────────────────────────

/// Data exchanged between the high-priority and low-priority tasks.  The lock
/// is held only long enough to copy values in or out.
#[derive(Debug, Default)]
struct SharedData {
    /// Most recent interval between two high-priority firings, microseconds.
    measured_interval_us: u64,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialise structured logging.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Tactus starting up...");

    let cli = Cli::parse();
    info!(
        run_secs = cli.run_secs,
        restart = cli.restart,
        config = ?cli.config,
        "Configuration"
    );

    if let Err(err) = run(&cli) {
        error!(error = %err, "Tactus exiting with failure");
        process::exit(1);
    }
    info!("Tactus finished");
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load_from_file(path)
            .context("could not load scheduler configuration")?,
        None => SchedulerConfig::default(),
    };

    let stop = StopToken::new();
    let shared = Arc::new(Mutex::new(SharedData::default()));
    let mut scheduler = Scheduler::with_config(config);

    info!(
        max_priority = scheduler.max_priority(),
        "host real-time priority ceiling"
    );

    // High-priority 1 ms task: measure the interval between firings and stop
    // the run when the beat budget is spent.
    {
        let stop = stop.clone();
        let shared = Arc::clone(&shared);
        let budget = u32::try_from(cli.run_secs.saturating_mul(1_000)).unwrap_or(u32::MAX);
        let mut prev: Option<Instant> = None;
        let mut beats = 0u32;
        scheduler.add_task(
            move || {
                let now = Instant::now();
                if let Some(last) = prev {
                    let interval_us = now.duration_since(last).as_micros() as u64;
                    if let Ok(mut data) = shared.lock() {
                        data.measured_interval_us = interval_us;
                    }
                }
                prev = Some(now);

                beats += 1;
                if beats >= budget {
                    beats = 0;
                    prev = None;
                    stop.request_stop();
                }
                Ok(())
            },
            "hp-measure",
            1,
            scheduler.max_priority(),
        )?;
    }

    // Low-priority 1 s task: report what the measurement task saw.
    {
        let shared = Arc::clone(&shared);
        let mut samples = 0u64;
        let mut sum_us = 0u64;
        scheduler.add_task(
            move || {
                let interval_us = shared
                    .lock()
                    .map(|data| data.measured_interval_us)
                    .unwrap_or(0);
                samples += 1;
                sum_us += interval_us;
                info!(
                    interval_us,
                    avg_interval_us = sum_us / samples,
                    "high-priority loop interval"
                );
                Ok(())
            },
            "lp-report",
            1_000,
            0,
        )?;
    }

    let faults = scheduler.fault_latch();
    scheduler.start()?;
    wait_for_run_end(&stop, &faults);
    scheduler.stop();
    report_faults(&faults)?;

    if cli.restart {
        warn!("scheduler will restart in 2 seconds");
        std::thread::sleep(Duration::from_secs(2));
        stop.clear();

        scheduler.start()?;
        wait_for_run_end(&stop, &faults);
        scheduler.stop();
        report_faults(&faults)?;
    }

    Ok(())
}

/// Outer wait loop: poll the stop token and the fault latch at millisecond
/// granularity.
fn wait_for_run_end(stop: &StopToken, faults: &FaultLatch) {
    while !stop.is_stop_requested() && !faults.is_raised() {
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn report_faults(faults: &FaultLatch) -> Result<()> {
    if let Some(report) = faults.report() {
        anyhow::bail!("scheduler fault: {report}");
    }
    Ok(())
}
