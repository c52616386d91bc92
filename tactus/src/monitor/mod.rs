/*
SPDX-FileCopyrightText: Copyright 2026 Tactus Project Contributors
SPDX-License-Identifier: MIT
*/

//! Timeliness monitoring for periodic tasks.
//!
//! One [`TimelinessMonitor`] per worker thread measures the wall-clock delta
//! between successive firings of its task, classifies each beat, and decides
//! when lateness escalates:
//!
//! | Classification | Condition |
//! |---|---|
//! | on-time | delta ≤ `period × (1 + jitter_tolerance)` (early beats absorb catch-up and are not punished) |
//! | late | delta above tolerance but below `period × critical_multiple` |
//! | critically late | delta ≥ `period × critical_multiple`, or the callback overran one or more whole periods |
//!
//! Escalation mirrors the observed production behavior — *warn once lateness
//! is seen, hard-fault once it is sustained*:
//!
//! * a **warning** is emitted once per lateness episode, when the consecutive
//!   count first reaches `warn_threshold`;
//! * a **fault** is emitted exactly once per threshold crossing, when a beat
//!   is critically late or the consecutive count exceeds
//!   `consecutive_late_ceiling`.  The degraded state is sticky until
//!   [`reset`](TimelinessMonitor::reset) (i.e. until the next `start()`).
//!
//! All state lives in an explicit, inspectable [`TimelinessState`] rather
//! than in hidden closure counters, and every observation takes the timestamp
//! as a parameter, so the whole policy is testable with synthetic clocks.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::MonitorConfig;

// ── Classification ────────────────────────────────────────────────────────────

/// Verdict for a single beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatClass {
    /// Delta within tolerance of the nominal period (or early).
    OnTime,
    /// Delta above tolerance but below the critical multiple.
    Late,
    /// Delta at or beyond the critical multiple, or a whole-period overrun.
    CriticallyLate,
}

impl fmt::Display for BeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeatClass::OnTime => write!(f, "on-time"),
            BeatClass::Late => write!(f, "late"),
            BeatClass::CriticallyLate => write!(f, "critically late"),
        }
    }
}

/// What the scheduler should do about a beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Nothing to report.
    None,
    /// Lateness episode began — log a warning, keep running.
    Warn { consecutive_late: u32 },
    /// Fatal: the task is degraded.  Raise the fault latch and halt the task.
    Fault {
        class: BeatClass,
        consecutive_late: u32,
        cumulative_late: u64,
    },
}

/// Full observation result for one beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    pub class: BeatClass,
    /// Delta since the previous firing; `None` on the first beat after reset.
    pub interval: Option<Duration>,
    pub escalation: Escalation,
}

// ── Policy knobs ──────────────────────────────────────────────────────────────

/// When `consecutive_late` drops back to zero.
///
/// `OnTimeBeat` (the default) makes consecutive-failure escalation reflect
/// *sustained* unreliability: any on-time beat ends the episode.  `Monotonic`
/// never forgives — the count only resets on `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    #[default]
    OnTimeBeat,
    Monotonic,
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Per-task timeliness counters.  Mutated only by the monitor on each firing;
/// reset only on `start()`, never mid-run.
#[derive(Debug, Clone, Default)]
pub struct TimelinessState {
    /// Timestamp of the previous firing; `None` until the first beat.
    pub last_fire: Option<Instant>,
    /// Late beats since the last on-time beat (under [`ResetPolicy::OnTimeBeat`])
    /// or since reset (under [`ResetPolicy::Monotonic`]).
    pub consecutive_late: u32,
    /// Late beats since reset, skipped beats included.  Always monotonic
    /// within a run.
    pub cumulative_late: u64,
}

// ── TimelinessMonitor ─────────────────────────────────────────────────────────

/// Measures and escalates scheduling lateness for one periodic task.
#[derive(Debug)]
pub struct TimelinessMonitor {
    period: Duration,
    /// Deltas at or below this are on-time.
    on_time_ceiling: Duration,
    /// Deltas at or above this are critically late.
    critical_floor: Duration,
    warn_threshold: u32,
    consecutive_late_ceiling: u32,
    reset_policy: ResetPolicy,
    state: TimelinessState,
    /// Warning already emitted for the current lateness episode.
    warned_episode: bool,
    /// Fault already emitted; sticky until `reset()`.
    degraded: bool,
}

impl TimelinessMonitor {
    /// Build a monitor for a task with the given nominal period.
    ///
    /// Out-of-range config values are clamped to their sane floor here so a
    /// hand-built (unvalidated) `MonitorConfig` cannot produce a panicking
    /// monitor; [`MonitorConfig::validate`] is still the place errors surface.
    pub fn new(period: Duration, config: &MonitorConfig) -> Self {
        let tolerance = config.jitter_tolerance.clamp(0.0, 1.0);
        let critical = config.critical_multiple.max(1.0);
        Self {
            period,
            on_time_ceiling: period.mul_f64(1.0 + tolerance),
            critical_floor: period.mul_f64(critical),
            warn_threshold: config.warn_threshold.max(1),
            consecutive_late_ceiling: config.consecutive_late_ceiling.max(1),
            reset_policy: config.reset_policy,
            state: TimelinessState::default(),
            warned_episode: false,
            degraded: false,
        }
    }

    /// Nominal period this monitor checks against.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Current counters.
    pub fn state(&self) -> &TimelinessState {
        &self.state
    }

    /// Has a fault already been reported for this run?
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Zero all counters and leave the degraded state.  Called on `start()`.
    pub fn reset(&mut self) {
        self.state = TimelinessState::default();
        self.warned_episode = false;
        self.degraded = false;
    }

    /// Observe one firing of the task.
    ///
    /// `now` is the firing timestamp; `skipped_beats` is how many whole beats
    /// the timer dropped because the callback overran (0 on a normal beat).
    /// The first firing after [`reset`](Self::reset) is on-time by definition.
    pub fn observe_fire(&mut self, now: Instant, skipped_beats: u32) -> Beat {
        let interval = self.state.last_fire.map(|prev| now.duration_since(prev));
        self.state.last_fire = Some(now);

        let class = if skipped_beats > 0 {
            // The callback failed to return before the next firing was due.
            BeatClass::CriticallyLate
        } else {
            match interval {
                None => BeatClass::OnTime,
                Some(delta) if delta >= self.critical_floor => BeatClass::CriticallyLate,
                Some(delta) if delta > self.on_time_ceiling => BeatClass::Late,
                Some(_) => BeatClass::OnTime,
            }
        };

        let escalation = self.escalate(class, skipped_beats);
        Beat {
            class,
            interval,
            escalation,
        }
    }

    fn escalate(&mut self, class: BeatClass, skipped_beats: u32) -> Escalation {
        match class {
            BeatClass::OnTime => {
                if self.reset_policy == ResetPolicy::OnTimeBeat {
                    self.state.consecutive_late = 0;
                    self.warned_episode = false;
                }
                Escalation::None
            }
            BeatClass::Late | BeatClass::CriticallyLate => {
                // The observed beat plus every dropped one counts as late.
                let late_beats = skipped_beats.saturating_add(1);
                self.state.consecutive_late =
                    self.state.consecutive_late.saturating_add(late_beats);
                self.state.cumulative_late =
                    self.state.cumulative_late.saturating_add(u64::from(late_beats));

                let fatal = class == BeatClass::CriticallyLate
                    || self.state.consecutive_late > self.consecutive_late_ceiling;

                if fatal {
                    if self.degraded {
                        return Escalation::None;
                    }
                    self.degraded = true;
                    return Escalation::Fault {
                        class,
                        consecutive_late: self.state.consecutive_late,
                        cumulative_late: self.state.cumulative_late,
                    };
                }

                if !self.warned_episode && self.state.consecutive_late >= self.warn_threshold {
                    self.warned_episode = true;
                    return Escalation::Warn {
                        consecutive_late: self.state.consecutive_late,
                    };
                }
                Escalation::None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
