/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Logical → OS priority mapping.
//!
//! Tasks carry a *logical* priority in `[0, max_priority()]`.  Logical `0` is
//! ordinary time-shared scheduling (`SCHED_OTHER`); `1..=max_priority()` map
//! onto the host's `SCHED_FIFO` range, preserving strict ordering: a higher
//! logical priority always yields a higher-or-equal OS priority.
//!
//! The ceiling is *queried*, never assumed.  On Linux an unprivileged process
//! is limited by `RLIMIT_RTPRIO`, which is commonly `0` — in that case
//! `max_priority()` is `0`, every task runs time-shared, and the scheduler
//! still works (best-effort, as documented).  Callers are expected to request
//! the top of whatever range they get for the most latency-sensitive task and
//! `0` for background/reporting tasks.
//!
//! Everything here is best-effort: a failed `pthread_setschedparam` (no
//! `CAP_SYS_NICE`) logs a warning and the worker continues at normal
//! priority.

use std::sync::OnceLock;

use tracing::{debug, warn};

// ── OS priority model ─────────────────────────────────────────────────────────

/// Resolved OS-level scheduling class for one worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum OsPriority {
    /// Default time-shared scheduling.
    Normal,
    /// `SCHED_FIFO` with the given OS priority value.
    Fifo(i32),
}

/// Host FIFO priority range actually grantable to this process.
#[derive(Debug, Clone, Copy)]
struct FifoRange {
    /// Lowest valid `SCHED_FIFO` priority value.
    os_min: i32,
    /// Number of grantable FIFO levels above `SCHED_OTHER` (0 = none).
    levels: u32,
}

fn fifo_range() -> FifoRange {
    static RANGE: OnceLock<FifoRange> = OnceLock::new();
    *RANGE.get_or_init(query_fifo_range)
}

/// Highest logical priority the host will honor for this process.
///
/// Query-only, no side effects.  The value is probed once and cached for the
/// process lifetime.
pub fn max_priority() -> u32 {
    fifo_range().levels
}

/// Map a validated logical priority onto the host range.
pub(crate) fn map_to_os(logical: u32) -> OsPriority {
    let range = fifo_range();
    if logical == 0 || range.levels == 0 {
        return OsPriority::Normal;
    }
    let level = logical.min(range.levels);
    OsPriority::Fifo(range.os_min + level as i32 - 1)
}

// ── Range probing ─────────────────────────────────────────────────────────────

#[cfg(unix)]
fn query_fifo_range() -> FifoRange {
    // SAFETY: both calls only read scheduler constants for a policy value.
    let (os_min, os_max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    if os_min < 0 || os_max < os_min {
        return FifoRange { os_min: 0, levels: 0 };
    }

    let cap = highest_grantable(os_max);
    if cap < os_min {
        return FifoRange { os_min, levels: 0 };
    }
    FifoRange {
        os_min,
        levels: (cap - os_min + 1) as u32,
    }
}

#[cfg(not(unix))]
fn query_fifo_range() -> FifoRange {
    FifoRange { os_min: 0, levels: 0 }
}

/// Highest FIFO priority value this process may actually set.
#[cfg(target_os = "linux")]
fn highest_grantable(os_max: i32) -> i32 {
    // Root (and CAP_SYS_NICE holders) bypass RLIMIT_RTPRIO.
    // SAFETY: geteuid has no failure modes.
    if unsafe { libc::geteuid() } == 0 {
        return os_max;
    }

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid out-pointer for the duration of the call.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut limit) } != 0 {
        return os_max;
    }
    if limit.rlim_cur == libc::RLIM_INFINITY {
        os_max
    } else {
        i64::try_from(limit.rlim_cur)
            .unwrap_or(i64::from(os_max))
            .min(i64::from(os_max)) as i32
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn highest_grantable(os_max: i32) -> i32 {
    os_max
}

// ── Application to the current thread ─────────────────────────────────────────

/// Apply a resolved OS priority to the calling worker thread.  Best-effort.
pub(crate) fn apply_to_current_thread(task: &str, os: OsPriority) {
    match os {
        OsPriority::Normal => {
            debug!(task, "worker running at normal (time-shared) priority");
        }
        OsPriority::Fifo(prio) => {
            #[cfg(unix)]
            {
                // SAFETY: sched_param is plain-old-data; zeroing then setting
                // the priority field initialises every platform variant.
                let rc = unsafe {
                    let mut param: libc::sched_param = std::mem::zeroed();
                    param.sched_priority = prio;
                    libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
                };
                if rc == 0 {
                    debug!(task, fifo_priority = prio, "SCHED_FIFO applied to worker");
                } else {
                    warn!(
                        task,
                        fifo_priority = prio,
                        errno = rc,
                        "could not apply SCHED_FIFO (missing CAP_SYS_NICE?), \
                         continuing at normal priority"
                    );
                }
            }
            #[cfg(not(unix))]
            {
                let _ = prio;
                warn!(task, "real-time priorities unsupported on this platform");
            }
        }
    }
}

/// Lock current and future pages into RAM so the periodic workers never take
/// a page fault mid-beat.  Returns `true` on success.
#[cfg(target_os = "linux")]
pub(crate) fn lock_process_memory() -> bool {
    // SAFETY: mlockall takes only flag bits and affects the whole process.
    unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) == 0 }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn lock_process_memory() -> bool {
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_zero_is_always_normal() {
        assert_eq!(map_to_os(0), OsPriority::Normal);
    }

    #[test]
    fn mapping_is_monotone_and_clamped() {
        let ceiling = max_priority();
        if ceiling == 0 {
            // Unprivileged host without an RT budget: everything time-shared.
            assert_eq!(map_to_os(1), OsPriority::Normal);
            assert_eq!(map_to_os(u32::MAX), OsPriority::Normal);
            return;
        }

        let mut previous = map_to_os(0);
        for logical in 1..=ceiling.min(64) {
            let current = map_to_os(logical);
            assert!(current >= previous, "ordering broken at logical {logical}");
            previous = current;
        }

        // Above the ceiling the mapping clamps instead of exceeding the range.
        assert_eq!(map_to_os(ceiling), map_to_os(ceiling.saturating_add(1)));
    }

    #[test]
    fn ceiling_is_stable_across_queries() {
        assert_eq!(max_priority(), max_priority());
    }
}
