/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Tactus — fixed-frequency, priority-preemptive periodic task scheduling
//! with built-in timeliness monitoring.
//!
//! Tactus drives deterministic periodic control loops (1 kHz robot control
//! being the canonical case) on a general-purpose, non-real-time OS.  Each
//! registered task gets its own worker thread, an absolute-deadline timer,
//! and a per-task timeliness monitor that warns on lateness episodes and
//! fail-safes the task when deadline failures become sustained or critical.
//!
//! ```text
//!  application thread                 worker thread (one per task)
//!  ──────────────────                 ────────────────────────────
//!  Scheduler::add_task(..) ─────►  registry
//!  Scheduler::start()      ─────►  spawn ──► loop {
//!                                              timer.wait_for_beat()
//!  loop {                                      monitor.observe_fire()
//!    poll StopToken                            callback()
//!    poll FaultLatch        ◄──────── raise    }
//!  }
//!  Scheduler::stop()       ─────►  join
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use tactus::{Scheduler, StopToken};
//!
//! fn main() -> anyhow::Result<()> {
//!     let stop = StopToken::new();
//!     let mut scheduler = Scheduler::new();
//!
//!     let token = stop.clone();
//!     let mut beats = 0u32;
//!     scheduler.add_task(
//!         move || {
//!             beats += 1;
//!             if beats >= 5_000 {
//!                 token.request_stop();
//!             }
//!             Ok(())
//!         },
//!         "control-loop",
//!         1,                         // period: 1 ms
//!         scheduler.max_priority(),  // most latency-sensitive task on top
//!     )?;
//!
//!     let faults = scheduler.fault_latch();
//!     scheduler.start()?;
//!     while !stop.is_stop_requested() && !faults.is_raised() {
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!     }
//!     scheduler.stop();
//!
//!     if let Some(report) = faults.report() {
//!         anyhow::bail!("scheduler fault: {report}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module layout
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`task`] | task descriptors and the callback contract |
//! | [`scheduler`] | the execution engine and its error types |
//! | [`monitor`] | beat classification and escalation policy |
//! | [`priority`] | logical → OS (`SCHED_FIFO`) priority mapping |
//! | [`signal`] | [`StopToken`] and [`FaultLatch`] |
//! | [`config`] | YAML policy configuration |

pub mod config;
pub mod monitor;
pub mod priority;
pub mod scheduler;
pub mod signal;
pub mod task;

mod timer;

pub use config::{MonitorConfig, SchedulerConfig};
pub use monitor::{Beat, BeatClass, Escalation, ResetPolicy, TimelinessMonitor, TimelinessState};
pub use priority::max_priority;
pub use scheduler::{ConfigurationError, Scheduler, StartError};
pub use signal::{FaultKind, FaultLatch, FaultReport, StopToken};
pub use task::{Callback, CallbackError, TaskSpec};
