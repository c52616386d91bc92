/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Structured error types for the Tactus scheduler.
//!
//! Two error enums model the two failure layers:
//!
//! * [`ConfigurationError`] — an invalid registration call
//!   (`add_task` / `clear_tasks`), surfaced synchronously at the call site.
//!   The scheduler state is left unmodified on every variant.
//! * [`StartError`] — `start()` could not bring the scheduler up.
//!
//! Runtime anomalies (lateness, callback failures) are deliberately *not*
//! errors — unwinding inside a latency-sensitive periodic context is itself a
//! timing hazard.  They travel through the non-throwing
//! [`FaultLatch`](crate::signal::FaultLatch) instead.

use thiserror::Error;

// ── Registration errors ───────────────────────────────────────────────────────

/// Invalid registration parameters.  Every variant names the offending field
/// and carries enough data for the caller to log or surface it unparsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// `period_ms` below the 1 ms floor.
    #[error("task '{task}' has invalid period {period_ms} ms — the minimum supported period is 1 ms")]
    InvalidPeriod { task: String, period_ms: u64 },

    /// `priority` above what the host will honor for this process.
    #[error("task '{task}' requests priority {priority} but this host honors at most {max}")]
    PriorityOutOfRange { task: String, priority: u32, max: u32 },

    /// Task names must be unique within one scheduler.
    #[error("a task named '{task}' is already registered — task names must be unique")]
    DuplicateTaskName { task: String },

    /// Registration is only valid before `start()` (or after `stop()`).
    #[error("cannot register task '{task}' while the scheduler is running")]
    RegistrationWhileRunning { task: String },

    /// `clear_tasks()` is only valid while idle.
    #[error("cannot clear tasks while the scheduler is running")]
    ClearWhileRunning,
}

// ── Lifecycle errors ──────────────────────────────────────────────────────────

/// `start()` failure.  The scheduler remains (or is returned to) the idle
/// state on every variant.
#[derive(Debug, Error)]
pub enum StartError {
    /// `start()` with an empty registry.
    #[error("no tasks registered — add at least one task before starting")]
    NoTasks,

    /// `start()` while already active; call `stop()` first to restart.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread for task '{task}'")]
    ThreadSpawn {
        task: String,
        #[source]
        source: std::io::Error,
    },
}
