/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the Tactus scheduler.
//!
//! A periodic task has two halves:
//!
//! ```text
//! application ──(closure)──►  Callback  ┐
//!                                       ├──►  RegisteredTask  (owned by Scheduler)
//! application ──(params)───►  TaskSpec  ┘
//! ```
//!
//! # Ownership model
//! The application moves both halves into [`Scheduler::add_task`] and never
//! sees them again; the descriptor is immutable from registration onward.  The
//! callback is wrapped in an `Arc<Mutex<..>>` so that worker threads of
//! successive `start()` / `stop()` cycles can share it, and so that at most
//! one invocation can ever be in flight (the mutex makes re-entrant overlap
//! structurally impossible — see the drop-and-count-as-late policy on the
//! scheduler).
//!
//! [`Scheduler::add_task`]: crate::scheduler::Scheduler::add_task

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::scheduler::error::ConfigurationError;

// ── Callback types ────────────────────────────────────────────────────────────

/// Error payload a task callback may return.
///
/// The scheduler never inspects the concrete type — a returned error is
/// operationally equivalent to an unschedulable task and is surfaced through
/// the same fault channel as a timeliness fault.  Unwinding is deliberately
/// not the error path inside a latency-sensitive periodic context; return an
/// `Err` instead.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A periodic unit of work.
///
/// Invoked once per beat on the task's dedicated worker thread.  `Ok(())`
/// continues the periodic loop; `Err(..)` halts this task (other tasks are
/// unaffected) and raises a [`FaultKind::Callback`] on the scheduler's fault
/// latch.
///
/// [`FaultKind::Callback`]: crate::signal::FaultKind::Callback
pub type Callback = Box<dyn FnMut() -> Result<(), CallbackError> + Send + 'static>;

// ── TaskSpec ──────────────────────────────────────────────────────────────────

/// Immutable descriptor of one periodic task.
///
/// Created by [`Scheduler::add_task`] at registration time and never mutated
/// afterwards.  The name is unique within a scheduler; the logical priority
/// lives in `[0, max_priority()]` where `0` is ordinary time-shared
/// scheduling and higher values map onto the host's real-time range.
///
/// [`Scheduler::add_task`]: crate::scheduler::Scheduler::add_task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Unique task name, used in log events and fault reports.
    pub name: String,

    /// Nominal firing interval.  The minimum supported period is 1 ms.
    pub period: Duration,

    /// Logical priority in `[0, max_priority()]`.  Higher preempts lower.
    pub priority: u32,
}

impl TaskSpec {
    /// Build a descriptor from the raw registration parameters.
    ///
    /// Does not validate — that is [`validate`](Self::validate)'s job, so the
    /// error can name the offending field.
    pub fn new(name: impl Into<String>, period_ms: u64, priority: u32) -> Self {
        Self {
            name: name.into(),
            period: Duration::from_millis(period_ms),
            priority,
        }
    }

    /// Nominal period in whole milliseconds.
    pub fn period_ms(&self) -> u64 {
        u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX)
    }

    /// Check the field-level registration preconditions.
    ///
    /// * `period` must be at least 1 ms.
    /// * `priority` must not exceed `max_priority` (queried from the host —
    ///   an unprivileged process may be granted a smaller range than the
    ///   theoretical OS maximum).
    ///
    /// Name uniqueness is checked by the scheduler, which owns the registry.
    pub(crate) fn validate(&self, max_priority: u32) -> Result<(), ConfigurationError> {
        if self.period < Duration::from_millis(1) {
            return Err(ConfigurationError::InvalidPeriod {
                task: self.name.clone(),
                period_ms: self.period_ms(),
            });
        }
        if self.priority > max_priority {
            return Err(ConfigurationError::PriorityOutOfRange {
                task: self.name.clone(),
                priority: self.priority,
                max: max_priority,
            });
        }
        Ok(())
    }
}

// ── RegisteredTask ────────────────────────────────────────────────────────────

/// A task as held in the scheduler's registry: descriptor plus shared,
/// serialised callback.
pub(crate) struct RegisteredTask {
    pub(crate) spec: TaskSpec,
    pub(crate) callback: Arc<Mutex<Callback>>,
}

impl RegisteredTask {
    pub(crate) fn new(spec: TaskSpec, callback: Callback) -> Self {
        Self {
            spec,
            callback: Arc::new(Mutex::new(callback)),
        }
    }
}

impl std::fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
