//! Scheduler configuration loading and validation.
//!
//! All monitor policy knobs and process-wide real-time options live in one
//! YAML file so deployments can tune escalation without recompiling.  The
//! expected structure is:
//!
//! ```yaml
//! monitor:
//!   jitter_tolerance: 0.1          # fraction of the period, (0, 1)
//!   critical_multiple: 4.0         # fatal at period × this, > 1
//!   consecutive_late_ceiling: 100  # fatal above this many consecutive lates
//!   warn_threshold: 1              # warn when an episode reaches this count
//!   reset_policy: on_time_beat     # or: monotonic
//! lock_memory: false               # mlockall() on start (Linux, needs privilege)
//! ```
//!
//! Every field is optional — partial files are accepted gracefully and
//! missing values fall back to their defaults.  Malformed YAML and
//! out-of-range values are errors.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::monitor::ResetPolicy;

// ── Value-range errors ────────────────────────────────────────────────────────

/// A config field whose value the monitor cannot work with.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValueError {
    #[error("jitter_tolerance must be in (0, 1), got {value}")]
    JitterToleranceOutOfRange { value: f64 },

    #[error("critical_multiple must be greater than 1, got {value}")]
    CriticalMultipleOutOfRange { value: f64 },

    #[error("consecutive_late_ceiling must be at least 1")]
    ZeroConsecutiveLateCeiling,

    #[error("warn_threshold must be at least 1")]
    ZeroWarnThreshold,
}

// ── MonitorConfig ─────────────────────────────────────────────────────────────

/// Timeliness-monitor policy knobs.  See the module doc for the YAML shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// On-time band above the nominal period, as a fraction of the period.
    /// A few percent absorbs OS scheduling noise on a non-real-time kernel.
    pub jitter_tolerance: f64,

    /// A beat at or beyond `period × critical_multiple` is critically late
    /// and immediately fatal.
    pub critical_multiple: f64,

    /// Consecutive late beats above this count escalate to a fault.
    pub consecutive_late_ceiling: u32,

    /// Consecutive late count at which the once-per-episode warning fires.
    pub warn_threshold: u32,

    /// When the consecutive counter resets (see [`ResetPolicy`]).
    pub reset_policy: ResetPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            jitter_tolerance: 0.1,
            critical_multiple: 4.0,
            consecutive_late_ceiling: 100,
            warn_threshold: 1,
            reset_policy: ResetPolicy::OnTimeBeat,
        }
    }
}

impl MonitorConfig {
    /// Check every field's value range.
    pub fn validate(&self) -> Result<(), ConfigValueError> {
        if !(self.jitter_tolerance > 0.0 && self.jitter_tolerance < 1.0) {
            return Err(ConfigValueError::JitterToleranceOutOfRange {
                value: self.jitter_tolerance,
            });
        }
        if !(self.critical_multiple > 1.0) {
            return Err(ConfigValueError::CriticalMultipleOutOfRange {
                value: self.critical_multiple,
            });
        }
        if self.consecutive_late_ceiling == 0 {
            return Err(ConfigValueError::ZeroConsecutiveLateCeiling);
        }
        if self.warn_threshold == 0 {
            return Err(ConfigValueError::ZeroWarnThreshold);
        }
        Ok(())
    }
}

// ── SchedulerConfig ───────────────────────────────────────────────────────────

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub monitor: MonitorConfig,

    /// Lock current and future memory pages on `start()` so periodic workers
    /// never page-fault mid-beat.  Requires privilege; failure to lock is a
    /// warning, not an error.
    pub lock_memory: bool,
}

impl SchedulerConfig {
    /// Parse and validate a YAML configuration file.
    ///
    /// # Errors
    /// Fails if the file cannot be read, the YAML is structurally invalid,
    /// or any value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open configuration file: {}", path.display()))?;

        let config: SchedulerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML file: {}", path.display()))?;

        config
            .monitor
            .validate()
            .with_context(|| format!("invalid monitor configuration in {}", path.display()))?;

        debug!(
            jitter_tolerance = config.monitor.jitter_tolerance,
            critical_multiple = config.monitor.critical_multiple,
            consecutive_late_ceiling = config.monitor.consecutive_late_ceiling,
            warn_threshold = config.monitor.warn_threshold,
            reset_policy = ?config.monitor.reset_policy,
            lock_memory = config.lock_memory,
            "scheduler configuration loaded"
        );
        Ok(config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
