//! Process health tracking shared between the service client and the
//! recovery automation.
//!
//! Write discipline: the service client records call outcomes through the
//! atomic counters; only the recovery automation moves `status`. Readers
//! may snapshot either at any time.

use counsel_protocol::{MemorySnapshot, ProcessReport, ProcessStatus};
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Health state for one supervised process.
pub struct HealthRecord {
    name: String,
    status: RwLock<ProcessStatus>,
    last_transition: RwLock<Instant>,
    restarts: RwLock<Vec<Instant>>,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl HealthRecord {
    /// Create a record starting in the healthy state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RwLock::new(ProcessStatus::Healthy),
            last_transition: RwLock::new(Instant::now()),
            restarts: RwLock::new(Vec::new()),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    /// Process name this record tracks.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a successful call, resetting the consecutive failure streak.
    pub fn record_success(&self, latency_ms: u64) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Record a failed call and return the new consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clear the consecutive failure streak. Called when a process returns
    /// to healthy so a pre-restart streak cannot degrade it again.
    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Current consecutive failure streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Total successful calls since startup.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Total failed calls since startup.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Latency of the most recent successful call.
    pub fn last_latency_ms(&self) -> u64 {
        self.last_latency_ms.load(Ordering::Relaxed)
    }

    /// Current supervision status.
    pub fn status(&self) -> ProcessStatus {
        *self.status.read()
    }

    /// Move the record to `next` if the episode ordering allows it.
    ///
    /// The recovery automation is the only caller in production; returns
    /// false when the transition is rejected.
    pub fn transition(&self, next: ProcessStatus) -> bool {
        let mut status = self.status.write();
        if !status.allows_transition(next) {
            warn!(
                "rejected status transition (process={}, from={}, to={})",
                self.name,
                status.as_str(),
                next.as_str()
            );
            return false;
        }
        info!(
            "process status changed (process={}, from={}, to={})",
            self.name,
            status.as_str(),
            next.as_str()
        );
        *status = next;
        *self.last_transition.write() = Instant::now();
        true
    }

    /// Time since the last accepted status transition.
    pub fn since_transition(&self) -> Duration {
        self.last_transition.read().elapsed()
    }

    /// Count a restart attempt and return how many fall inside the window.
    pub fn note_restart(&self, window: Duration) -> u32 {
        let mut restarts = self.restarts.write();
        let now = Instant::now();
        restarts.push(now);
        restarts.retain(|at| now.duration_since(*at) <= window);
        restarts.len() as u32
    }

    /// Restart attempts that fall inside the rolling window.
    pub fn restarts_in_window(&self, window: Duration) -> u32 {
        let now = Instant::now();
        self.restarts
            .read()
            .iter()
            .filter(|at| now.duration_since(**at) <= window)
            .count() as u32
    }

    /// Build a report row enriched with the latest observed model state.
    pub fn report(
        &self,
        loaded_models: Vec<String>,
        memory: MemorySnapshot,
        window: Duration,
    ) -> ProcessReport {
        ProcessReport {
            name: self.name.clone(),
            status: self.status(),
            loaded_models,
            memory,
            consecutive_failures: self.consecutive_failures(),
            restarts_in_window: self.restarts_in_window(window),
        }
    }
}

/// Registry of health records keyed by process name.
#[derive(Clone, Default)]
pub struct HealthBoard {
    records: Arc<RwLock<HashMap<String, Arc<HealthRecord>>>>,
}

impl HealthBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process, returning its record (existing or fresh).
    pub fn register(&self, name: &str) -> Arc<HealthRecord> {
        let mut records = self.records.write();
        records
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(HealthRecord::new(name)))
            .clone()
    }

    /// Fetch a record by process name.
    pub fn get(&self, name: &str) -> Option<Arc<HealthRecord>> {
        self.records.read().get(name).cloned()
    }

    /// All records sorted by process name for stable output.
    pub fn list(&self) -> Vec<Arc<HealthRecord>> {
        let mut records: Vec<Arc<HealthRecord>> =
            self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name().cmp(b.name()));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failure_streak_resets_on_success() {
        let record = HealthRecord::new("model-service");
        assert_eq!(record.record_failure(), 1);
        assert_eq!(record.record_failure(), 2);
        record.record_success(12);
        assert_eq!(record.consecutive_failures(), 0);
        assert_eq!(record.total_failures(), 2);
        assert_eq!(record.total_successes(), 1);
        assert_eq!(record.last_latency_ms(), 12);
    }

    #[test]
    fn transition_honors_episode_ordering() {
        let record = HealthRecord::new("model-service");
        assert!(!record.transition(ProcessStatus::Restarting));
        assert!(record.transition(ProcessStatus::Degraded));
        assert!(record.transition(ProcessStatus::Restarting));
        assert!(record.transition(ProcessStatus::Cooldown));
        assert!(record.transition(ProcessStatus::Healthy));
        assert_eq!(record.status(), ProcessStatus::Healthy);
    }

    #[test]
    fn restart_window_prunes_old_attempts() {
        let record = HealthRecord::new("model-service");
        let window = Duration::from_secs(600);
        assert_eq!(record.note_restart(window), 1);
        assert_eq!(record.note_restart(window), 2);
        assert_eq!(record.restarts_in_window(window), 2);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(record.restarts_in_window(Duration::from_millis(1)), 0);
    }

    #[test]
    fn board_registers_once_per_name() {
        let board = HealthBoard::new();
        let first = board.register("model-service");
        first.record_failure();
        let second = board.register("model-service");
        assert_eq!(second.consecutive_failures(), 1);
        assert_eq!(board.list().len(), 1);
        assert!(board.get("missing").is_none());
    }
}
