//! Health and status types shared between the service, the supervisor, and
//! external status queries.

use serde::{Deserialize, Serialize};

/// Liveness state of one supervised process.
///
/// Transitions within a failure episode are monotonic: healthy -> degraded ->
/// restarting -> (healthy | cooldown), and cooldown -> healthy only after the
/// dwell time. A crash observed during cooldown opens a new episode via
/// cooldown -> degraded. Fatal is terminal for automation; only an operator
/// restart clears it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Serving normally.
    #[default]
    Healthy,
    /// Consecutive failures crossed the threshold; fallbacks in effect.
    Degraded,
    /// A restart has been issued and is in progress.
    Restarting,
    /// Post-restart dwell period before the process may be healthy again.
    Cooldown,
    /// Restart budget exhausted; automation has given up.
    Fatal,
}

impl ProcessStatus {
    /// Stable lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Healthy => "healthy",
            ProcessStatus::Degraded => "degraded",
            ProcessStatus::Restarting => "restarting",
            ProcessStatus::Cooldown => "cooldown",
            ProcessStatus::Fatal => "fatal",
        }
    }

    /// Whether the supervisor may move a record from `self` to `next`.
    ///
    /// Encodes the monotonic episode ordering; anything may enter `Fatal`.
    pub fn allows_transition(&self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        if next == Fatal {
            return !matches!(self, Fatal);
        }
        matches!(
            (self, next),
            (Healthy, Degraded)
                | (Degraded, Restarting)
                | (Restarting, Healthy)
                | (Restarting, Cooldown)
                | (Cooldown, Healthy)
                | (Cooldown, Degraded)
        )
    }
}

/// Point-in-time memory usage of a process and its host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Resident set size of the process, in megabytes.
    pub rss_mb: u64,
    /// Memory still available on the host, in megabytes.
    pub available_mb: u64,
}

/// What the service reports about itself when asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    /// True when the embedding path and one generation-capable path are
    /// reachable.
    pub ready: bool,
    /// Names of models currently resident.
    pub loaded_models: Vec<String>,
    /// Memory usage at probe time.
    pub memory: MemorySnapshot,
    /// Seconds since the service process started.
    pub uptime_secs: u64,
}

/// Supervisor-level view of one supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Process name as registered with the supervisor.
    pub name: String,
    /// Current supervision status.
    pub status: ProcessStatus,
    /// Names of models currently resident, from the last heartbeat or probe.
    pub loaded_models: Vec<String>,
    /// Last observed memory usage.
    pub memory: MemorySnapshot,
    /// Consecutive failed calls observed by the client.
    pub consecutive_failures: u32,
    /// Restart attempts consumed within the rolling window.
    pub restarts_in_window: u32,
}

/// Top-level status returned by the external status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// True only when embedding and one generation-capable path are
    /// reachable, possibly in fallback mode.
    pub ready: bool,
    /// Per-process detail.
    pub processes: Vec<ProcessReport>,
}
