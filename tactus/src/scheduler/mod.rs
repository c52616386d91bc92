//! Periodic task execution engine.
//!
//! [`Scheduler`] owns a registry of periodic tasks and drives each one from
//! its own OS thread: a drift-free timer fires at the task's period, the
//! timeliness monitor classifies every beat, then the task's callback runs.
//! Escalated anomalies are latched on the shared [`FaultLatch`]; the
//! application's outer loop observes the latch and decides when to call
//! [`stop`](Scheduler::stop).
//!
//! # Design decisions vs the C++ implementation this was modelled on
//!
//! | Topic | C++ | Rust |
//! |---|---|---|
//! | Stop signal | file-local `static atomic<bool>` written by callbacks | explicit [`StopToken`](crate::signal::StopToken) owned by the application |
//! | Callback errors | `throw` inside the RT loop | `Result` return + non-throwing fault latch |
//! | Per-task counters | `static` locals inside callbacks | explicit [`TimelinessState`](crate::monitor::TimelinessState) owned by the monitor |
//! | Overlap policy | implicit (one thread per task) | same, plus drop-and-count-as-late on overrun |
//! | Teardown | destructor stops threads | `Drop` performs an implicit `stop()` |
//!
//! # Shared-state contract for callbacks
//!
//! State shared between a high-priority and a low-priority task's callbacks
//! must be protected by a lock held only for the minimal critical section of
//! copying the value in or out.  A long-held lock inside a high-priority
//! periodic callback stalls the publisher *and* shows up as lateness on every
//! contending task — that is a correctness bug in client code, not in the
//! scheduler.
//!
//! # Best-effort, not hard real-time
//!
//! On a non-real-time kernel this engine provides deterministic *best-effort*
//! scheduling: monitored, with graceful degradation (warn, then fail-safe via
//! the fault latch).  It never promises kernel-level guarantees.

pub mod error;

pub use error::{ConfigurationError, StartError};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, SchedulerConfig};
use crate::monitor::{Escalation, TimelinessMonitor};
use crate::priority;
use crate::signal::{FaultKind, FaultLatch, FaultReport};
use crate::task::{Callback, CallbackError, RegisteredTask, TaskSpec};
use crate::timer::PeriodicTimer;

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Fixed-frequency, priority-preemptive task scheduler.
///
/// Lifecycle: constructed idle → tasks registered → [`start`](Self::start)
/// (active) → [`stop`](Self::stop) (idle, restartable) → dropped (implicit
/// stop).  Restarting re-initialises every task's timeliness state.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Vec<RegisteredTask>,
    run_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    faults: FaultLatch,
    max_priority: u32,
    memory_locked: bool,
}

impl Scheduler {
    /// Scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Scheduler with an explicit configuration (see
    /// [`SchedulerConfig::load_from_file`]).
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            run_flag: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            faults: FaultLatch::new(),
            max_priority: priority::max_priority(),
            memory_locked: false,
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// Register a new periodic task.
    ///
    /// Preconditions: the scheduler is idle, `period_ms >= 1`, `priority`
    /// within `[0, max_priority()]`, and `name` unique among registered
    /// tasks.  A violation returns a [`ConfigurationError`] naming the
    /// offending field and leaves the registry untouched.  No thread is
    /// created until [`start`](Self::start).
    pub fn add_task<F>(
        &mut self,
        callback: F,
        name: impl Into<String>,
        period_ms: u64,
        priority: u32,
    ) -> Result<(), ConfigurationError>
    where
        F: FnMut() -> Result<(), CallbackError> + Send + 'static,
    {
        let spec = TaskSpec::new(name, period_ms, priority);
        if self.is_running() {
            return Err(ConfigurationError::RegistrationWhileRunning { task: spec.name });
        }
        spec.validate(self.max_priority)?;
        if self.tasks.iter().any(|t| t.spec.name == spec.name) {
            return Err(ConfigurationError::DuplicateTaskName { task: spec.name });
        }

        debug!(
            task = %spec.name,
            period_ms = spec.period_ms(),
            priority = spec.priority,
            "task registered"
        );
        self.tasks.push(RegisteredTask::new(spec, Box::new(callback)));
        Ok(())
    }

    /// Remove every registered task.  Only valid while idle.
    pub fn clear_tasks(&mut self) -> Result<(), ConfigurationError> {
        if self.is_running() {
            return Err(ConfigurationError::ClearWhileRunning);
        }
        self.tasks.clear();
        Ok(())
    }

    /// Number of registered tasks.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Highest logical priority this host will honor.  Query only, no side
    /// effects; may be lower than the OS maximum for unprivileged processes.
    pub fn max_priority(&self) -> u32 {
        self.max_priority
    }

    /// The shared fault channel.  Cleared on every [`start`](Self::start).
    pub fn fault_latch(&self) -> FaultLatch {
        self.faults.clone()
    }

    /// `true` between a successful [`start`](Self::start) and the matching
    /// [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Spin up one periodic worker thread per registered task.
    ///
    /// Re-initialises all timeliness state and clears the fault latch, so a
    /// `stop()` / `start()` cycle behaves exactly like a fresh start.
    ///
    /// # Errors
    /// [`StartError::NoTasks`], [`StartError::AlreadyRunning`], or
    /// [`StartError::ThreadSpawn`] (in which case any workers already
    /// spawned are torn down again before returning).
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        if self.tasks.is_empty() {
            return Err(StartError::NoTasks);
        }

        self.faults.clear();
        self.lock_memory_if_configured();
        self.run_flag.store(true, Ordering::Release);

        for task in &self.tasks {
            let spec = task.spec.clone();
            let callback = Arc::clone(&task.callback);
            let run = Arc::clone(&self.run_flag);
            let faults = self.faults.clone();
            let monitor_config = self.config.monitor.clone();

            let spawned = thread::Builder::new()
                .name(format!("tactus-{}", spec.name))
                .spawn({
                    let spec = spec.clone();
                    move || worker_loop(spec, callback, monitor_config, run, faults)
                });
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    // Roll back the partial start before surfacing the error.
                    self.stop();
                    return Err(StartError::ThreadSpawn {
                        task: spec.name,
                        source,
                    });
                }
            }
        }

        info!(task_count = self.tasks.len(), "scheduler started");
        Ok(())
    }

    /// Signal every worker to exit at its next safe point and join them.
    ///
    /// Idempotent and safe to call from any thread, including from inside a
    /// task callback: the calling worker's own handle is skipped (that
    /// thread exits on its next flag check; it cannot join itself).  After
    /// `stop` returns, no further callback invocation occurs on any joined
    /// worker.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.run_flag.store(false, Ordering::Release);

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                // Callback panics are caught inside the worker, so this only
                // fires on a bug in the worker loop itself.
                error!("worker thread panicked outside the callback guard");
            }
        }
        info!("scheduler stopped");
    }

    fn lock_memory_if_configured(&mut self) {
        if !self.config.lock_memory || self.memory_locked {
            return;
        }
        if priority::lock_process_memory() {
            self.memory_locked = true;
            info!("process memory locked (mlockall)");
        } else {
            warn!("memory locking requested but unavailable on this host, continuing without");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    /// Guaranteed teardown: dropping an active scheduler performs an
    /// implicit [`stop`](Self::stop) on every exit path.
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks)
            .field("running", &self.is_running())
            .field("max_priority", &self.max_priority)
            .finish_non_exhaustive()
    }
}

// ── Worker loop ───────────────────────────────────────────────────────────────

/// Body of one periodic worker thread.
///
/// Per beat: wait on the timer → timeliness check → callback.  The loop exits
/// on the stop flag, on a timeliness fault, or on a callback failure; the
/// latter two latch a [`FaultReport`] first.  Other tasks are never affected
/// by this task's exit.
fn worker_loop(
    spec: TaskSpec,
    callback: Arc<Mutex<Callback>>,
    monitor_config: MonitorConfig,
    run: Arc<AtomicBool>,
    faults: FaultLatch,
) {
    priority::apply_to_current_thread(&spec.name, priority::map_to_os(spec.priority));

    let mut timer = PeriodicTimer::new(spec.period);
    let mut monitor = TimelinessMonitor::new(spec.period, &monitor_config);
    info!(
        task = %spec.name,
        period_ms = spec.period_ms(),
        priority = spec.priority,
        "periodic worker started"
    );

    while run.load(Ordering::Acquire) {
        let skipped = timer.wait_for_beat();
        if !run.load(Ordering::Acquire) {
            break;
        }

        let beat = monitor.observe_fire(Instant::now(), skipped);
        match beat.escalation {
            Escalation::None => {}
            Escalation::Warn { consecutive_late } => {
                warn!(
                    task = %spec.name,
                    consecutive_late,
                    interval_us = beat.interval.map(|d| d.as_micros() as u64),
                    period_ms = spec.period_ms(),
                    "task is running late"
                );
            }
            Escalation::Fault {
                class,
                consecutive_late,
                cumulative_late,
            } => {
                error!(
                    task = %spec.name,
                    %class,
                    consecutive_late,
                    cumulative_late,
                    "timeliness fault — task degraded, halting further invocations"
                );
                faults.raise(FaultReport {
                    task: spec.name.clone(),
                    kind: FaultKind::Timeliness {
                        class,
                        consecutive_late,
                        cumulative_late,
                    },
                });
                break;
            }
        }

        if let Err(message) = invoke_guarded(&callback) {
            error!(
                task = %spec.name,
                error = %message,
                "callback failed — halting further invocations"
            );
            faults.raise(FaultReport {
                task: spec.name.clone(),
                kind: FaultKind::Callback { message },
            });
            break;
        }
    }

    debug!(task = %spec.name, "periodic worker exited");
}

/// Invoke the callback, converting both `Err` returns and panics into a
/// rendered failure message.  The panic is caught *inside* the lock scope so
/// the mutex is never poisoned by a misbehaving callback.
fn invoke_guarded(callback: &Arc<Mutex<Callback>>) -> Result<(), String> {
    let mut guard = match callback.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match catch_unwind(AssertUnwindSafe(|| (*guard)())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("callback panicked: {message}")
    } else {
        "callback panicked".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ResetPolicy;
    use crate::signal::StopToken;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    // Engine tests use generous periods and lenient monitor settings so that
    // scheduling noise on a loaded CI host cannot trip spurious faults; the
    // escalation policy itself is covered by the monitor's own unit tests.
    fn lenient() -> SchedulerConfig {
        SchedulerConfig {
            monitor: MonitorConfig {
                jitter_tolerance: 0.5,
                critical_multiple: 500.0,
                consecutive_late_ceiling: u32::MAX,
                warn_threshold: u32::MAX,
                reset_policy: ResetPolicy::OnTimeBeat,
            },
            lock_memory: false,
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::with_config(lenient())
    }

    fn counting_task(counter: &Arc<AtomicU32>) -> impl FnMut() -> Result<(), CallbackError> + Send {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn noop() -> Result<(), CallbackError> {
        Ok(())
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn duplicate_name_is_rejected_and_registry_unchanged() {
        let mut sched = scheduler();
        sched.add_task(noop, "loop", 10, 0).unwrap();

        let err = sched.add_task(noop, "loop", 20, 0).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateTaskName { .. }));
        assert_eq!(sched.num_tasks(), 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let mut sched = scheduler();
        let err = sched.add_task(noop, "loop", 0, 0).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPeriod { .. }));
        assert_eq!(sched.num_tasks(), 0);
    }

    #[test]
    fn priority_above_host_ceiling_is_rejected() {
        let mut sched = scheduler();
        let max = sched.max_priority();
        let err = sched
            .add_task(noop, "loop", 10, max.saturating_add(1))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::PriorityOutOfRange { .. }));
    }

    #[test]
    fn priority_equal_to_host_ceiling_is_accepted() {
        let mut sched = scheduler();
        let max = sched.max_priority();
        sched.add_task(noop, "loop", 10, max).unwrap();
    }

    #[test]
    fn registration_after_start_is_rejected() {
        let mut sched = scheduler();
        sched.add_task(noop, "loop", 10, 0).unwrap();
        sched.start().unwrap();

        let err = sched.add_task(noop, "late-comer", 10, 0).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::RegistrationWhileRunning { .. }
        ));
        assert_eq!(sched.num_tasks(), 1);
        sched.stop();
    }

    #[test]
    fn clear_tasks_only_while_idle() {
        let mut sched = scheduler();
        sched.add_task(noop, "loop", 10, 0).unwrap();
        sched.start().unwrap();
        assert!(matches!(
            sched.clear_tasks().unwrap_err(),
            ConfigurationError::ClearWhileRunning
        ));
        sched.stop();

        sched.clear_tasks().unwrap();
        assert_eq!(sched.num_tasks(), 0);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn start_without_tasks_fails() {
        let mut sched = scheduler();
        assert!(matches!(sched.start().unwrap_err(), StartError::NoTasks));
        assert!(!sched.is_running());
    }

    #[test]
    fn start_twice_fails() {
        let mut sched = scheduler();
        sched.add_task(noop, "loop", 10, 0).unwrap();
        sched.start().unwrap();
        assert!(matches!(
            sched.start().unwrap_err(),
            StartError::AlreadyRunning
        ));
        sched.stop();
    }

    #[test]
    fn callback_fires_periodically() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut sched = scheduler();
        sched
            .add_task(counting_task(&counter), "counter", 5, 0)
            .unwrap();

        sched.start().unwrap();
        thread::sleep(Duration::from_millis(120));
        sched.stop();

        let beats = counter.load(Ordering::Relaxed);
        assert!((5..=40).contains(&beats), "got {beats} beats in 120 ms at 5 ms");
    }

    #[test]
    fn stop_is_idempotent_and_safe_when_idle() {
        let mut sched = scheduler();
        sched.stop(); // never started

        sched.add_task(noop, "loop", 10, 0).unwrap();
        sched.start().unwrap();
        sched.stop();
        sched.stop();
        assert!(!sched.is_running());
    }

    #[test]
    fn stop_is_callable_from_another_thread() {
        let mut sched = scheduler();
        sched.add_task(noop, "loop", 5, 0).unwrap();
        sched.start().unwrap();

        thread::scope(|scope| {
            scope.spawn(|| sched.stop());
        });
        assert!(!sched.is_running());
    }

    #[test]
    fn no_callback_runs_after_stop_returns() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut sched = scheduler();
        sched
            .add_task(counting_task(&counter), "counter", 5, 0)
            .unwrap();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        sched.stop();

        let at_stop = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), at_stop);
    }

    #[test]
    fn restart_behaves_like_a_fresh_start() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut sched = scheduler();
        sched
            .add_task(counting_task(&counter), "counter", 5, 0)
            .unwrap();

        sched.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        sched.stop();
        let first_run = counter.load(Ordering::Relaxed);
        assert!(first_run > 0);

        sched.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        sched.stop();
        assert!(counter.load(Ordering::Relaxed) > first_run, "restart resumed firing");
    }

    #[test]
    fn dropping_an_active_scheduler_stops_all_invocations() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut sched = scheduler();
        sched
            .add_task(counting_task(&counter), "counter", 5, 0)
            .unwrap();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        drop(sched); // implicit stop + join
        let at_drop = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), at_drop);
    }

    // ── Overlap / drop-and-count-as-late ──────────────────────────────────────

    #[test]
    fn overrunning_callback_never_overlaps_and_skipped_beats_count_as_late() {
        let invocations = Arc::new(AtomicU32::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicBool::new(false));

        let mut sched = scheduler();
        {
            let invocations = Arc::clone(&invocations);
            let overlap = Arc::clone(&overlap);
            let in_flight = Arc::clone(&in_flight);
            sched
                .add_task(
                    move || {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        invocations.fetch_add(1, Ordering::SeqCst);
                        // Overrun ~3.5 periods; the timer must drop the
                        // missed beats instead of queuing them.
                        thread::sleep(Duration::from_millis(35));
                        in_flight.store(false, Ordering::SeqCst);
                        Ok(())
                    },
                    "overrunner",
                    10,
                    0,
                )
                .unwrap();
        }

        let faults = sched.fault_latch();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(150));
        sched.stop();

        assert!(!overlap.load(Ordering::SeqCst), "re-entrant invocation observed");
        assert!(faults.is_raised(), "whole-period overrun must escalate");
        match faults.report().unwrap().kind {
            FaultKind::Timeliness {
                consecutive_late,
                cumulative_late,
                ..
            } => {
                assert!(consecutive_late >= 3, "skipped beats must count as late");
                assert!(cumulative_late >= 3);
            }
            other => panic!("expected a timeliness fault, got {other:?}"),
        }
    }

    // ── Fault isolation ───────────────────────────────────────────────────────

    #[test]
    fn failing_callback_halts_only_its_own_task() {
        let healthy_beats = Arc::new(AtomicU32::new(0));
        let mut sched = scheduler();

        let mut beats = 0u32;
        sched
            .add_task(
                move || {
                    beats += 1;
                    if beats >= 3 {
                        return Err("sensor went away".into());
                    }
                    Ok(())
                },
                "failing",
                5,
                0,
            )
            .unwrap();
        sched
            .add_task(counting_task(&healthy_beats), "healthy", 5, 0)
            .unwrap();

        let faults = sched.fault_latch();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(150));
        sched.stop();

        let report = faults.report().expect("callback error must latch a fault");
        assert_eq!(report.task, "failing");
        assert!(matches!(report.kind, FaultKind::Callback { .. }));
        assert!(report.kind.to_string().contains("sensor went away"));

        let beats = healthy_beats.load(Ordering::Relaxed);
        assert!(beats >= 10, "healthy task was starved: {beats} beats");
    }

    #[test]
    fn panicking_callback_is_isolated_like_an_error() {
        let mut sched = scheduler();
        sched
            .add_task(
                || panic!("out of bounds in client code"),
                "panicker",
                5,
                0,
            )
            .unwrap();

        let faults = sched.fault_latch();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        sched.stop();

        let report = faults.report().expect("panic must latch a fault");
        assert!(matches!(report.kind, FaultKind::Callback { .. }));
        assert!(report.kind.to_string().contains("out of bounds"));
    }

    #[test]
    fn fault_latch_is_cleared_on_restart() {
        let mut sched = scheduler();
        let failed_once = Arc::new(AtomicBool::new(false));
        {
            let failed_once = Arc::clone(&failed_once);
            sched
                .add_task(
                    move || {
                        if !failed_once.swap(true, Ordering::SeqCst) {
                            return Err("first run fails".into());
                        }
                        Ok(())
                    },
                    "flaky",
                    5,
                    0,
                )
                .unwrap();
        }

        let faults = sched.fault_latch();
        sched.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        sched.stop();
        assert!(faults.is_raised());

        sched.start().unwrap();
        assert!(!faults.is_raised(), "restart must clear the latch");
        sched.stop();
    }

    // ── Stop-token integration ────────────────────────────────────────────────

    #[test]
    fn callback_can_request_stop_through_its_token() {
        let token = StopToken::new();
        let mut sched = scheduler();
        {
            let token = token.clone();
            let mut beats = 0u32;
            sched
                .add_task(
                    move || {
                        beats += 1;
                        if beats >= 5 {
                            token.request_stop();
                        }
                        Ok(())
                    },
                    "self-stopper",
                    5,
                    0,
                )
                .unwrap();
        }

        sched.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !token.is_stop_requested() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        sched.stop();

        assert!(token.is_stop_requested(), "token never fired");
    }
}
