/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Application-facing signal primitives.
//!
//! Two small types connect the periodic workers to the owning application
//! without any global state:
//!
//! * [`StopToken`] — a cooperative cancellation token.  The application
//!   creates one, clones it into the task callbacks that may decide to stop,
//!   and polls it from its outer wait loop.  This replaces the file-local
//!   `static atomic<bool>` stop flag pattern of the C++ usage this crate was
//!   modelled on: the token's lifecycle is explicit and per-application, not
//!   hidden cross-task global state.
//! * [`FaultLatch`] — the single observable fault channel.  Every fatal
//!   condition (timeliness fault or callback failure) is funnelled through
//!   one latch; the first report wins and stays readable until cleared.  The
//!   scheduler never unwinds across the application's control flow — the
//!   application observes the latch and decides when to call `stop()`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::monitor::BeatClass;

// ── StopToken ─────────────────────────────────────────────────────────────────

/// Cooperative, clonable stop signal.
///
/// All clones share one flag.  Once requested, the stop state is latched; use
/// [`clear`](Self::clear) to reuse the token across a scheduler restart.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.  Safe to call from any thread, including from inside
    /// a periodic callback.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arm the token, e.g. before restarting a stopped scheduler.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ── Fault reports ─────────────────────────────────────────────────────────────

/// What kind of fatal condition a task ran into.
///
/// A broken callback is operationally equivalent to an unschedulable task, so
/// both variants travel through the same [`FaultLatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// The timeliness monitor escalated sustained or critical lateness.
    Timeliness {
        /// Classification of the beat that triggered the escalation.
        class: BeatClass,
        consecutive_late: u32,
        cumulative_late: u64,
    },

    /// The task's callback returned an error or panicked.
    Callback {
        /// Rendered message of the callback's error or panic payload.
        message: String,
    },
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Timeliness {
                class,
                consecutive_late,
                cumulative_late,
            } => write!(
                f,
                "timeliness fault ({class}): {consecutive_late} consecutive late beats, \
                 {cumulative_late} cumulative"
            ),
            FaultKind::Callback { message } => write!(f, "callback failure: {message}"),
        }
    }
}

/// A latched fatal condition: which task degraded, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    /// Name of the offending task.
    pub task: String,
    pub kind: FaultKind,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}': {}", self.task, self.kind)
    }
}

// ── FaultLatch ────────────────────────────────────────────────────────────────

/// First-fault-wins latched fault channel.
///
/// Cheap to poll (`is_raised` is a single atomic load) so the application's
/// outer wait loop can spin on it at millisecond granularity.  Obtain one via
/// [`Scheduler::fault_latch`]; the scheduler clears it on every `start()`.
///
/// [`Scheduler::fault_latch`]: crate::scheduler::Scheduler::fault_latch
#[derive(Debug, Clone, Default)]
pub struct FaultLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug, Default)]
struct LatchInner {
    raised: AtomicBool,
    report: Mutex<Option<FaultReport>>,
}

impl FaultLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a fault report.  Returns `true` if this call latched, `false`
    /// if another fault was already recorded (the earlier report is kept).
    pub fn raise(&self, report: FaultReport) -> bool {
        let mut slot = self.lock_report();
        if slot.is_some() {
            return false;
        }
        *slot = Some(report);
        self.inner.raised.store(true, Ordering::Release);
        true
    }

    /// Has any fault been latched since the last [`clear`](Self::clear)?
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// The latched report, if any.
    pub fn report(&self) -> Option<FaultReport> {
        self.lock_report().clone()
    }

    /// Drop the latched report and re-arm the latch.
    pub fn clear(&self) {
        let mut slot = self.lock_report();
        *slot = None;
        self.inner.raised.store(false, Ordering::Release);
    }

    // A poisoned mutex only means a panicking writer; the stored report is a
    // plain value, so recover it rather than propagate the poison.
    fn lock_report(&self) -> MutexGuard<'_, Option<FaultReport>> {
        match self.inner.report.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn report(task: &str) -> FaultReport {
        FaultReport {
            task: task.to_string(),
            kind: FaultKind::Callback {
                message: "boom".to_string(),
            },
        }
    }

    // ── StopToken ─────────────────────────────────────────────────────────────

    #[test]
    fn stop_token_clones_share_state() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_stop_requested());

        token.request_stop();
        assert!(clone.is_stop_requested());

        clone.clear();
        assert!(!token.is_stop_requested());
    }

    // ── FaultLatch ────────────────────────────────────────────────────────────

    #[test]
    fn latch_starts_unraised() {
        let latch = FaultLatch::new();
        assert!(!latch.is_raised());
        assert!(latch.report().is_none());
    }

    #[test]
    fn first_fault_wins() {
        let latch = FaultLatch::new();
        assert!(latch.raise(report("first")));
        assert!(!latch.raise(report("second")), "second raise must not latch");

        assert!(latch.is_raised());
        assert_eq!(latch.report().unwrap().task, "first");
    }

    #[test]
    fn clear_rearms_the_latch() {
        let latch = FaultLatch::new();
        latch.raise(report("t"));
        latch.clear();

        assert!(!latch.is_raised());
        assert!(latch.report().is_none());
        assert!(latch.raise(report("again")), "cleared latch accepts a new fault");
    }

    #[test]
    fn clones_observe_the_same_fault() {
        let latch = FaultLatch::new();
        let observer = latch.clone();
        latch.raise(report("t"));
        assert!(observer.is_raised());
        assert_eq!(observer.report().unwrap().task, "t");
    }

    #[test]
    fn reports_render_for_logging() {
        let text = report("hp-loop").to_string();
        assert!(text.contains("hp-loop"));
        assert!(text.contains("boom"));
    }
}
