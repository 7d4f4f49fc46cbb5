//! Recovery automation for the model service process.
//!
//! A background loop polls the health record and the transport, walking the
//! failure episode states: degraded on repeated failures or a dead channel,
//! restarting with a bounded budget, cooldown after every restart so a
//! crash-looping binary cannot trigger a restart storm, back to healthy only
//! after the dwell and a ready probe. Memory pressure relief runs alongside:
//! above the high-water mark the least recently used non-essential model is
//! evicted.

use crate::health::HealthRecord;
use crate::service::ModelServiceClient;
use chrono::Utc;
use counsel_config::CounselConfig;
use counsel_protocol::{Heartbeat, ProcessStatus, ServiceTransport};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A heartbeat older than this many intervals counts as missed.
const STALE_HEARTBEAT_INTERVALS: u64 = 3;

/// Background supervisor for one service process.
pub struct RecoveryAutomation {
    client: Arc<ModelServiceClient>,
    transport: Arc<dyn ServiceTransport>,
    health: Arc<HealthRecord>,
    config: Arc<CounselConfig>,
    last_restart_at: Option<Instant>,
}

/// Handle to a running recovery loop.
pub struct RecoveryHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RecoveryHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl RecoveryAutomation {
    pub fn new(
        client: Arc<ModelServiceClient>,
        transport: Arc<dyn ServiceTransport>,
        health: Arc<HealthRecord>,
        config: Arc<CounselConfig>,
    ) -> Self {
        Self {
            client,
            transport,
            health,
            config,
            last_restart_at: None,
        }
    }

    /// Spawn the poll loop. The loop exits when the handle is stopped or
    /// dropped.
    pub fn start(mut self) -> RecoveryHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let poll_interval = Duration::from_millis(self.config.recovery.poll_interval_ms);
        let task = tokio::spawn(async move {
            info!(
                "recovery automation started (poll_interval_ms={})",
                poll_interval.as_millis()
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => self.tick().await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("recovery automation stopped");
        });
        RecoveryHandle { shutdown, task }
    }

    /// Run one poll cycle. Sequential checks let a cascade (dead channel ->
    /// degraded -> restarting) complete within a single poll.
    pub async fn tick(&mut self) {
        if self.health.status() == ProcessStatus::Healthy {
            self.check_healthy().await;
        }
        if self.health.status() == ProcessStatus::Degraded {
            self.begin_restart().await;
        }
        if self.health.status() == ProcessStatus::Restarting {
            self.check_restart();
        }
        if self.health.status() == ProcessStatus::Cooldown {
            self.check_cooldown().await;
        }
        if self.health.status() == ProcessStatus::Fatal {
            error!(
                "service is fatal; no further restarts (process={})",
                self.health.name()
            );
        }
    }

    async fn check_healthy(&mut self) {
        if !self.transport.is_alive() {
            warn!("service channel is dead (process={})", self.health.name());
            self.health.transition(ProcessStatus::Degraded);
            return;
        }
        if heartbeat_stale(
            self.transport.last_heartbeat(),
            self.config.service.heartbeat_interval_ms,
        ) {
            warn!("service heartbeat is stale (process={})", self.health.name());
            self.health.transition(ProcessStatus::Degraded);
            return;
        }
        let failures = self.health.consecutive_failures();
        if failures >= self.config.recovery.degraded_after_failures {
            warn!(
                "consecutive failures crossed threshold (process={}, failures={})",
                self.health.name(),
                failures
            );
            self.health.transition(ProcessStatus::Degraded);
            return;
        }
        self.relieve_memory_pressure().await;
    }

    async fn begin_restart(&mut self) {
        let window = Duration::from_secs(self.config.recovery.restart_window_secs);
        if self.health.restarts_in_window(window) >= self.config.recovery.restart_limit {
            error!(
                "restart budget exhausted, giving up (process={}, limit={})",
                self.health.name(),
                self.config.recovery.restart_limit
            );
            self.health.transition(ProcessStatus::Fatal);
            return;
        }
        if !self.health.transition(ProcessStatus::Restarting) {
            return;
        }
        let attempt = self.health.note_restart(window);
        info!(
            "restarting service (process={}, attempt_in_window={})",
            self.health.name(),
            attempt
        );
        if let Err(err) = self.transport.restart().await {
            warn!(
                "restart attempt failed (process={}, error={})",
                self.health.name(),
                err
            );
        }
        self.last_restart_at = Some(Instant::now());
    }

    /// A restart always lands in cooldown, either once the channel is back
    /// or once the grace period expires.
    fn check_restart(&mut self) {
        let grace = Duration::from_millis(self.config.recovery.restart_grace_ms);
        let waited = self
            .last_restart_at
            .map(|at| at.elapsed())
            .unwrap_or(grace);
        if self.transport.is_alive() || waited >= grace {
            self.health.transition(ProcessStatus::Cooldown);
        }
    }

    async fn check_cooldown(&mut self) {
        if !self.transport.is_alive() {
            warn!(
                "service died during cooldown (process={})",
                self.health.name()
            );
            self.health.transition(ProcessStatus::Degraded);
            return;
        }
        let dwell = Duration::from_secs(self.config.recovery.cooldown_secs);
        if self.health.since_transition() < dwell {
            return;
        }
        match self.client.health_probe().await {
            Ok(probe) if probe.ready => {
                self.health.reset_failures();
                self.health.transition(ProcessStatus::Healthy);
                info!("service recovered (process={})", self.health.name());
            }
            Ok(_) => debug!(
                "service not ready yet, staying in cooldown (process={})",
                self.health.name()
            ),
            Err(err) => debug!(
                "probe failed during cooldown (process={}, error={})",
                self.health.name(),
                err
            ),
        }
    }

    async fn relieve_memory_pressure(&self) {
        let Some(high_water_mb) = self.config.recovery.memory_high_water_mb else {
            return;
        };
        let Some(heartbeat) = self.transport.last_heartbeat() else {
            return;
        };
        if heartbeat.memory.rss_mb <= high_water_mb {
            return;
        }
        let Some(candidate) =
            eviction_candidate(&heartbeat.loaded_models, &self.config.models.embedding)
        else {
            return;
        };
        warn!(
            "memory high water crossed, evicting (rss_mb={}, high_water_mb={}, model={})",
            heartbeat.memory.rss_mb, high_water_mb, candidate
        );
        match self.client.evict(&candidate).await {
            Ok(was_loaded) => info!(
                "eviction complete (model={}, was_loaded={})",
                candidate, was_loaded
            ),
            Err(err) => warn!("eviction failed (model={}, error={})", candidate, err),
        }
    }
}

/// Whether a heartbeat is too old to count as liveness. No heartbeat yet is
/// not staleness; a fresh process may not have emitted one.
fn heartbeat_stale(heartbeat: Option<Heartbeat>, interval_ms: u64) -> bool {
    let Some(heartbeat) = heartbeat else {
        return false;
    };
    let age = Utc::now().signed_duration_since(heartbeat.created_at);
    age > chrono::Duration::milliseconds((interval_ms * STALE_HEARTBEAT_INTERVALS) as i64)
}

/// Pick the least recently used model that is not the embedder. Loaded
/// models arrive LRU-first; the embedder is essential to retrieval and is
/// never evicted for pressure.
fn eviction_candidate(loaded: &[String], embedding_model: &str) -> Option<String> {
    loaded
        .iter()
        .find(|name| name.as_str() != embedding_model)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_protocol::MemorySnapshot;
    use pretty_assertions::assert_eq;

    fn beat_aged(seconds_ago: i64) -> Heartbeat {
        Heartbeat {
            seq: 7,
            created_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
            loaded_models: Vec::new(),
            memory: MemorySnapshot::default(),
        }
    }

    #[test]
    fn missing_heartbeat_is_not_stale() {
        assert!(!heartbeat_stale(None, 50));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        assert!(heartbeat_stale(Some(beat_aged(10)), 50));
        assert!(!heartbeat_stale(Some(beat_aged(0)), 60_000));
    }

    #[test]
    fn eviction_skips_the_embedder() {
        let loaded = vec![
            "embedder".to_string(),
            "utility".to_string(),
            "reasoner".to_string(),
        ];
        assert_eq!(
            eviction_candidate(&loaded, "embedder"),
            Some("utility".to_string())
        );
        assert_eq!(eviction_candidate(&["embedder".to_string()], "embedder"), None);
    }
}
