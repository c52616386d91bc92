/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Drift-free periodic timer for the worker threads.
//!
//! Deadlines are absolute: each beat's deadline is the previous deadline plus
//! the period, never `now + period`, so late wakeups do not accumulate into
//! long-term drift.  When the caller falls a whole period (or more) behind —
//! the callback overran — the missed beats are *dropped*, not queued: the
//! timer fires immediately, reports how many beats were skipped, and realigns
//! the deadline past `now`.  The monitor counts those skipped beats as late
//! (drop-and-count-as-late).

use std::time::{Duration, Instant};

/// How long before the deadline the coarse sleep hands over to a busy spin.
/// `thread::sleep` on a non-real-time kernel routinely overshoots by tens of
/// microseconds; the spin tail absorbs that at the cost of a short burn.
const SPIN_TAIL: Duration = Duration::from_micros(150);

/// Absolute-deadline periodic timer.  One per worker thread.
#[derive(Debug)]
pub(crate) struct PeriodicTimer {
    period: Duration,
    next_deadline: Instant,
}

impl PeriodicTimer {
    /// Start a timer whose first beat is one period from now.
    pub(crate) fn new(period: Duration) -> Self {
        debug_assert!(!period.is_zero(), "task periods are validated to >= 1 ms");
        Self {
            period,
            next_deadline: Instant::now() + period,
        }
    }

    /// Block until the next beat and return the number of beats skipped.
    ///
    /// Returns `0` on a normal wait.  If the deadline already passed when the
    /// caller arrived, the beat fires immediately and the return value is the
    /// number of *whole* periods the caller was behind (each one a dropped
    /// beat).
    pub(crate) fn wait_for_beat(&mut self) -> u32 {
        let now = Instant::now();
        if now < self.next_deadline {
            sleep_until(self.next_deadline);
            self.next_deadline += self.period;
            return 0;
        }

        // Overrun: fire now, drop the beats we are behind, realign.
        let behind = now.duration_since(self.next_deadline);
        let skipped =
            u32::try_from(behind.as_nanos() / self.period.as_nanos()).unwrap_or(u32::MAX);
        self.next_deadline += self
            .period
            .saturating_mul(skipped.saturating_add(1));
        skipped
    }
}

/// Hybrid wait: coarse `thread::sleep` for the bulk, busy spin for the tail.
fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline.duration_since(now);
        if remaining <= SPIN_TAIL {
            break;
        }
        std::thread::sleep(remaining - SPIN_TAIL);
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
