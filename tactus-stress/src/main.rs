/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Manual degradation exercise for the Tactus timeliness monitor.
//!
//! Runs a single 1 ms task at the highest grantable priority.  After a
//! warm-up period the callback starts sleeping for `--delay` microseconds
//! every beat, pushing the loop past its deadline.  Expected observable
//! sequence: clean warm-up → lateness warnings → timeliness fault on the
//! latch → exit code 1.  Exiting cleanly at `--timeout` means the host
//! absorbed the injected delay (or the delay was too small).
//!
//! NOT for production; this exists to be watched, not deployed.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tactus::{Scheduler, SchedulerConfig};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Tactus degradation exercise.
///
/// Example:
///   tactus-stress -w 5 --delay 1100 --timeout 30
#[derive(Debug, Parser)]
#[command(
    name = "tactus-stress",
    about = "Tactus degradation exercise – injects per-beat delay until the monitor faults",
    long_about = None,
)]
struct Cli {
    /// Seconds of clean running before delay injection starts.
    #[arg(short = 'w', long = "warmup", default_value_t = 5)]
    warmup_secs: u64,

    /// Injected per-beat delay in microseconds.  The default exceeds the
    /// 1 ms period so the loop is overcommitted even with an otherwise empty
    /// callback; values below the period may be absorbed on fast hosts.
    #[arg(short = 'd', long = "delay", default_value_t = 1_100)]
    extra_delay_us: u64,

    /// Give up and exit cleanly after this many seconds without a fault.
    #[arg(short = 't', long = "timeout", default_value_t = 30)]
    timeout_secs: u64,

    /// Path to the YAML scheduler configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        warmup_secs = cli.warmup_secs,
        extra_delay_us = cli.extra_delay_us,
        timeout_secs = cli.timeout_secs,
        config = ?cli.config,
        "Configuration"
    );

    match run(&cli) {
        Ok(faulted) => {
            if faulted {
                process::exit(1);
            }
        }
        Err(err) => {
            error!(error = %err, "stress run failed to start");
            process::exit(2);
        }
    }
}

/// Returns `Ok(true)` if the injected delay drove the monitor to a fault.
fn run(cli: &Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load_from_file(path)
            .context("could not load scheduler configuration")?,
        None => SchedulerConfig::default(),
    };

    let mut scheduler = Scheduler::with_config(config);
    let warmup_beats = cli.warmup_secs.saturating_mul(1_000);
    let delay = Duration::from_micros(cli.extra_delay_us);

    {
        let mut beats = 0u64;
        scheduler.add_task(
            move || {
                beats += 1;
                if beats == warmup_beats {
                    warn!(">>>>> injecting simulated loop delay <<<<<");
                }
                if beats >= warmup_beats {
                    std::thread::sleep(delay);
                }
                Ok(())
            },
            "stressed-loop",
            1,
            scheduler.max_priority(),
        )?;
    }

    let faults = scheduler.fault_latch();
    scheduler.start()?;

    let deadline = Instant::now() + Duration::from_secs(cli.timeout_secs);
    while !faults.is_raised() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    scheduler.stop();

    match faults.report() {
        Some(report) => {
            error!(%report, "monitor escalated the injected delay as expected");
            Ok(true)
        }
        None => {
            info!("no fault within the timeout — host absorbed the injected delay");
            Ok(false)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
